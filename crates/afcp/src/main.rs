use clap::{Parser, Subcommand};
use rsafc::{AfcFs, Filesystem};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(about = "Browse and copy device files over an AFC connection")]
struct Cli {
    /// AFC endpoint, host:port
    address: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List a directory
    Ls { path: String },

    /// Print a recursive tree of a directory
    Tree { path: String },

    /// Show metadata for a path
    Stat { path: String },

    /// Show device-level key/value facts
    Info,

    /// Create a directory
    Mkdir { path: String },

    /// Remove a file, or a whole tree with --recursive
    Rm {
        path: String,
        #[arg(long)]
        recursive: bool,
    },

    /// Rename a path on the device
    Mv { from: String, to: String },

    /// Copy a device file or directory tree to a local path
    Pull { src: String, dst: PathBuf },

    /// Copy a local file to the device
    Push { src: PathBuf, dst: String },
}

async fn run(cli: Cli) -> rsafc::Result<()> {
    let fs = AfcFs::dial(&cli.address).await?;

    match cli.command {
        Command::Ls { path } => {
            for name in fs.read_dir(&path).await? {
                println!("{name}");
            }
        }
        Command::Tree { path } => {
            print!("{}", fs.tree_view(&path).await?);
        }
        Command::Stat { path } => {
            let info = fs.stat(&path).await?;
            println!("name:   {}", info.name());
            println!("kind:   {:?}", info.kind());
            println!("size:   {}", info.size());
            println!("blocks: {}", info.blocks());
            println!("nlink:  {}", info.nlink());
            if info.is_link() {
                println!("target: {}", info.link_target());
            }
        }
        Command::Info => {
            for (key, value) in fs.session().device_info().await? {
                println!("{key}: {value}");
            }
        }
        Command::Mkdir { path } => fs.mkdir(&path).await?,
        Command::Rm {
            path,
            recursive: true,
        } => fs.remove_all(&path).await?,
        Command::Rm { path, .. } => fs.remove(&path).await?,
        Command::Mv { from, to } => fs.rename(&from, &to).await?,
        Command::Pull { src, dst } => fs.pull(&src, &dst).await?,
        Command::Push { src, dst } => {
            let mut total = 0u64;
            fs.push_with_progress(&src, &dst, |n, _| total += n).await?;
            println!("pushed {total} bytes");
        }
    }

    fs.session().close().await
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let exit_code = match run(Cli::parse()).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e}");
            -1
        }
    };

    std::process::exit(exit_code);
}
