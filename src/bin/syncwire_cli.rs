use std::{
    error::Error,
    io::{self, Write},
};

use clap::{Args, Parser, Subcommand};
use syncwire::{
    Options, PathFilter, SyncItem,
    binding::{ItemStream, LocalPeer, Receiver, Sender, TcpReceiver, TcpSender},
    config::TransportConfig,
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address of the syncwire server
    #[arg(short, long, default_value = "127.0.0.1:7878")]
    address: String,
    #[command(flatten)]
    flags: Flags,
    #[command(subcommand)]
    command: Action,
}

#[derive(Debug, Args)]
struct Flags {
    /// Compare checksums when validating files
    #[arg(long, global = true)]
    checksum: bool,
    /// Remove target entries missing on the source
    #[arg(long, global = true)]
    delete: bool,
    /// Report mutations on the server without applying them
    #[arg(long, global = true)]
    dry_run: bool,
    /// Descend into symbolic links
    #[arg(long, global = true)]
    follow_links: bool,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// List the items under a remote root
    List {
        root: String,
        /// Skip directories with this name
        #[arg(long)]
        exclude_dir: Vec<String>,
        /// Skip files ending with this suffix
        #[arg(long)]
        exclude_suffix: Vec<String>,
        /// Enumerate as the target side
        #[arg(long)]
        target: bool,
    },
    /// Print the digest of a remote file
    Checksum { root: String, path: String },
    /// Copy a remote file into a local directory
    Pull {
        root: String,
        path: String,
        destination: String,
    },
    /// Copy a local file under a remote root
    Push {
        source: String,
        path: String,
        root: String,
    },
    /// Create a directory under a remote root
    Mkdir { root: String, path: String },
    /// Remove a file or directory under a remote root
    Rm { root: String, path: String },
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let options = Options::builder()
        .checksum(cli.flags.checksum)
        .delete(cli.flags.delete)
        .dry_run(cli.flags.dry_run)
        .follow_sym_links(cli.flags.follow_links)
        .build();
    let config = TransportConfig::default();
    let mut stdout = io::stdout().lock();

    match cli.command {
        Action::List {
            root,
            exclude_dir,
            exclude_suffix,
            target,
        } => {
            let filter = exclude_dir
                .into_iter()
                .fold(PathFilter::new(), PathFilter::exclude_dir);
            let filter = exclude_suffix
                .into_iter()
                .fold(filter, PathFilter::exclude_suffix);

            if target {
                let mut receiver = TcpReceiver::new(config, options);
                receiver.connect(&cli.address)?;
                let items = Receiver::generate_sync_items(
                    &receiver,
                    &root,
                    options.follow_sym_links(),
                    &filter,
                );
                print_items(&mut stdout, items)?;
                receiver.disconnect()?;
            } else {
                let mut sender = TcpSender::new(config, options);
                sender.connect(&cli.address)?;
                let items = Sender::generate_sync_items(
                    &sender,
                    &root,
                    options.follow_sym_links(),
                    &filter,
                );
                print_items(&mut stdout, items)?;
                sender.disconnect()?;
            }
        }
        Action::Checksum { root, path } => {
            let mut sender = TcpSender::new(config, options);
            sender.connect(&cli.address)?;
            let digest = Sender::generate_checksum(&sender, &root, &path, &mut |bytes| {
                eprint!("\r{bytes} bytes");
            })?;
            eprintln!();
            writeln!(stdout, "{digest}  {path}")?;
            sender.disconnect()?;
        }
        Action::Pull {
            root,
            path,
            destination,
        } => {
            let mut sender = TcpSender::new(config, options);
            sender.connect(&cli.address)?;
            let item = find_item(
                Sender::generate_sync_items(
                    &sender,
                    &root,
                    options.follow_sym_links(),
                    &PathFilter::new(),
                ),
                &path,
            )?;

            let local = LocalPeer::new(options);
            let mut data = sender.read_file(&root, &path, item.size())?;
            local.write_file(&destination, &path, item.size(), &mut data)?;
            drop(data);
            local.update(&destination, &item)?;
            writeln!(stdout, "pulled {path} ({} bytes)", item.size())?;
            sender.disconnect()?;
        }
        Action::Push { source, path, root } => {
            let local = LocalPeer::new(options);
            let item = find_item(
                Sender::generate_sync_items(
                    &local,
                    &source,
                    options.follow_sym_links(),
                    &PathFilter::new(),
                ),
                &path,
            )?;

            let mut receiver = TcpReceiver::new(config, options);
            receiver.connect(&cli.address)?;
            let mut data = local.read_file(&source, &path, item.size())?;
            receiver.write_file(&root, &path, item.size(), &mut data)?;
            receiver.update(&root, &item)?;
            receiver.validate_file(&root, &item)?;
            writeln!(stdout, "pushed {path} ({} bytes)", item.size())?;
            receiver.disconnect()?;
        }
        Action::Mkdir { root, path } => {
            let mut receiver = TcpReceiver::new(config, options);
            receiver.connect(&cli.address)?;
            receiver.create_directory(&root, &SyncItem::directory(path, 0)?)?;
            receiver.disconnect()?;
        }
        Action::Rm { root, path } => {
            let mut receiver = TcpReceiver::new(config, options);
            receiver.connect(&cli.address)?;
            receiver.delete(&root, &SyncItem::file(path, 0, 0)?)?;
            receiver.disconnect()?;
        }
    }

    Ok(())
}

fn print_items(out: &mut impl Write, items: ItemStream<'_>) -> Result<(), Box<dyn Error>> {
    for item in items {
        let item = item?;
        let kind = if item.is_file() { 'f' } else { 'd' };
        writeln!(
            out,
            "{kind} {:>12} {:>13} {} {}",
            item.size(),
            item.last_modified(),
            item.permissions().unwrap_or("-"),
            item.relative_path()
        )?;
    }
    Ok(())
}

fn find_item(items: ItemStream<'_>, path: &str) -> Result<SyncItem, Box<dyn Error>> {
    for item in items {
        let item = item?;
        if item.relative_path() == path && item.is_file() {
            return Ok(item);
        }
    }
    Err(format!("no file '{path}' under the given root").into())
}
