use std::{fs, io::Read};

use clap::Parser;
use serde_json::Value;
use wg_bridge::{Bridge, Error, Key, MemoryBackend, WgCmdBackend, WireguardApi};

/// Configure and inspect WireGuard interfaces from JSON descriptions
#[derive(Debug, clap::Parser)]
#[command(version, about)]
pub struct Args {
    /// Apply changes to an in-memory device instead of the kernel
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// List WireGuard interfaces
    List,

    /// Print one interface, or every interface keyed by name
    Show { iface: Option<String> },

    /// Configure an interface from a JSON description (`-` reads stdin)
    Set { iface: String, file: String },

    /// Print a new private key
    Genkey,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if args.dry_run {
        let backend = MemoryBackend::new();
        if let Command::Set { iface, .. } | Command::Show { iface: Some(iface) } = &args.command {
            backend.add_interface(iface.as_str());
        }
        run(Bridge::new(backend), args.command).await
    } else {
        run(Bridge::new(WgCmdBackend::new()), args.command).await
    }
}

async fn run<B: WireguardApi>(bridge: Bridge<B>, command: Command) -> Result<(), Error> {
    match command {
        Command::List => {
            for name in bridge.list_task().run().await? {
                println!("{name}");
            }
        }

        Command::Show { iface: Some(iface) } => {
            print_json(&bridge.query_task(&iface).run().await?)?;
        }

        Command::Show { iface: None } => {
            print_json(&Value::Object(bridge.query_all().await?))?;
        }

        Command::Set { iface, file } => {
            let description = load_description(&file)?;
            bridge.configure_task(&iface, &description).run().await?;
            log::info!("configured {iface}");

            print_json(&bridge.query_task(&iface).run().await?)?;
        }

        Command::Genkey => println!("{}", Key::generate_private()),
    }

    Ok(())
}

fn load_description(file: &str) -> Result<Value, Error> {
    let data = if file == "-" {
        let mut data = String::new();
        std::io::stdin().read_to_string(&mut data)?;
        data
    } else {
        fs::read_to_string(file)?
    };

    Ok(serde_json::from_str(&data)?)
}

fn print_json(value: &Value) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
