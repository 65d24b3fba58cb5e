use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::{Arg, ArgAction, ArgMatches, Command};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, span, Level};
use tracing_subscriber::EnvFilter;

use objstore::{
    browse,
    config::{self, ConfigError},
    factory,
    model::{Connection, StorageError, UrlOperation},
    util::object::basename,
    DEFAULT_URL_EXPIRY,
};

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to write output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
}

fn command() -> Command {
    let bucket = || Arg::new("BUCKET").required(true);
    let key = || Arg::new("KEY").required(true);

    Command::new("objstore")
        .version(clap::crate_version!())
        .about("Browse S3, Azure Blob, Aliyun OSS and PCG storage through one interface")
        .subcommand_required(true)
        .arg(
            Arg::new("connections")
                .long("connections")
                .env(config::CONNECTIONS_ENV)
                .default_value(config::DEFAULT_CONNECTIONS_FILE)
                .value_parser(clap::value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("connection")
                .long("connection")
                .short('c')
                .help("Connection id or name")
                .global(true),
        )
        .subcommand(Command::new("types").about("List registered storage client types"))
        .subcommand(Command::new("buckets").about("List buckets"))
        .subcommand(
            Command::new("ls")
                .about("List one level of a bucket, or the buckets when none is known")
                .arg(Arg::new("BUCKET"))
                .arg(Arg::new("PREFIX").default_value("")),
        )
        .subcommand(
            Command::new("put")
                .about("Upload a local file")
                .arg(bucket())
                .arg(key())
                .arg(
                    Arg::new("FILE")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("get")
                .about("Download an object")
                .arg(bucket())
                .arg(key())
                .arg(Arg::new("OUT").value_parser(clap::value_parser!(PathBuf))),
        )
        .subcommand(
            Command::new("url")
                .about("Signed URL for viewing or downloading")
                .arg(bucket())
                .arg(key())
                .arg(
                    Arg::new("OPERATION")
                        .default_value("view")
                        .value_parser(["view", "download"]),
                ),
        )
        .subcommand(
            Command::new("presign")
                .about("Signed read URL with a custom lifetime")
                .arg(bucket())
                .arg(key())
                .arg(
                    Arg::new("expires")
                        .long("expires")
                        .help("Lifetime in seconds")
                        .default_value("3600")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("rm")
                .about("Delete objects")
                .arg(bucket())
                .arg(Arg::new("KEY").required(true).action(ArgAction::Append)),
        )
        .subcommand(
            Command::new("rmdir")
                .about("Delete a folder and everything under it")
                .arg(bucket())
                .arg(Arg::new("PREFIX").required(true)),
        )
        .subcommand(
            Command::new("mkdir")
                .about("Create a folder marker")
                .arg(bucket())
                .arg(Arg::new("PATH").required(true)),
        )
        .subcommand(
            Command::new("preview")
                .about("Text content or a signed URL for an object")
                .arg(bucket())
                .arg(key()),
        )
}

fn arg<'a>(matches: &'a ArgMatches, name: &'static str) -> Result<&'a str, CliError> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or(CliError::MissingArgument(name))
}

fn print<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn connection(matches: &ArgMatches) -> Result<Connection, CliError> {
    let path = matches
        .get_one::<PathBuf>("connections")
        .ok_or(CliError::MissingArgument("connections"))?;
    let selector = matches.get_one::<String>("connection").map(String::as_str);

    let connections = config::load_connections(path).await?;
    Ok(config::select(&connections, selector)?.clone())
}

async fn run(matches: ArgMatches) -> Result<(), CliError> {
    let Some((name, sub)) = matches.subcommand() else {
        return Err(CliError::MissingArgument("command"));
    };

    if name == "types" {
        return print(&factory::get_supported_client_types());
    }

    let conn = connection(&matches).await?;
    info!(
        connection_name = conn.name.as_str(),
        client_type = conn.resolved_client_type(),
        command = name,
        "connection selected"
    );
    let client = factory::create_client_for(&conn).await?;

    match name {
        "buckets" => print(&client.list_buckets().await?),
        "ls" => {
            let bucket = sub.get_one::<String>("BUCKET").map(String::as_str);
            let listing = browse::list(&*client, &conn, bucket, arg(sub, "PREFIX")?).await?;
            print(&listing)
        }
        "put" => {
            let file = sub
                .get_one::<PathBuf>("FILE")
                .ok_or(CliError::MissingArgument("FILE"))?;
            let size = browse::upload_file(&*client, arg(sub, "BUCKET")?, arg(sub, "KEY")?, file).await?;
            print(&serde_json::json!({ "success": true, "size": size }))
        }
        "get" => {
            let key = arg(sub, "KEY")?;
            let out = sub
                .get_one::<PathBuf>("OUT")
                .cloned()
                .unwrap_or_else(|| PathBuf::from(basename(key)));
            let size = browse::download_file(&*client, arg(sub, "BUCKET")?, key, &out).await?;
            print(&serde_json::json!({ "path": out, "size": size }))
        }
        "url" => {
            let operation: UrlOperation = arg(sub, "OPERATION")?.parse()?;
            let url = client
                .get_object_url(arg(sub, "BUCKET")?, arg(sub, "KEY")?, operation)
                .await?;
            print(&serde_json::json!({ "url": url }))
        }
        "presign" => {
            let secs = sub
                .get_one::<u64>("expires")
                .copied()
                .unwrap_or(DEFAULT_URL_EXPIRY.as_secs());
            let url = client
                .get_signed_url(arg(sub, "BUCKET")?, arg(sub, "KEY")?, Duration::from_secs(secs))
                .await?;
            print(&serde_json::json!({ "url": url }))
        }
        "rm" => {
            let keys: Vec<String> = sub
                .get_many::<String>("KEY")
                .map(|keys| keys.cloned().collect())
                .unwrap_or_default();
            let bucket = arg(sub, "BUCKET")?;
            if let [key] = keys.as_slice() {
                client.delete_object(bucket, key).await?;
                print(&serde_json::json!({ "success": true }))
            } else {
                print(&client.delete_objects(bucket, &keys).await?)
            }
        }
        "rmdir" => print(&browse::delete_folder(&*client, arg(sub, "BUCKET")?, arg(sub, "PREFIX")?).await?),
        "mkdir" => {
            client.create_folder(arg(sub, "BUCKET")?, arg(sub, "PATH")?).await?;
            print(&serde_json::json!({ "success": true }))
        }
        "preview" => print(&browse::preview(&*client, arg(sub, "BUCKET")?, arg(sub, "KEY")?).await?),
        _ => Err(CliError::MissingArgument("command")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let span = span!(Level::INFO, "main", context = "main");
    let _e = span.enter();
    info!("called");

    match run(command().get_matches()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error_message = %err, error_group = "main");
            eprintln!("error: {}", err);
            ExitCode::FAILURE
        }
    }
}
