mod store;

use std::{
    error::Error as StdError,
    fs,
    io::{self, Write as _},
    path::PathBuf,
    process,
};

use clap::{Parser, Subcommand};
use clap_num::maybe_hex;
use log::{debug, info};
use niffs::{Config, FileType, Niffs, OpenFlags};

use store::ImageFile;

type ImageFs = Niffs<ImageFile, 4096, 4>;

/// Inspect and edit NIFFS flash images.
#[derive(Parser, Debug)]
#[command(about, author, disable_version_flag = true)]
struct Args {
    /// Print version information.
    #[arg(short = 'V', long)]
    version: bool,

    /// Path of the flash image.
    #[arg(short, long, default_value = "niffs.bin")]
    image: PathBuf,

    /// Number of paged sectors.
    #[arg(long, default_value_t = 16, value_parser = maybe_hex::<u32>)]
    sectors: u32,

    /// Sector size in bytes.
    #[arg(long, default_value_t = 0x1000, value_parser = maybe_hex::<u32>)]
    sector_size: u32,

    /// Requested page size in bytes.
    #[arg(long, default_value_t = 256, value_parser = maybe_hex::<u32>)]
    page_size: u32,

    /// Number of sectors for linear files, following the paged sectors.
    #[arg(long, default_value_t = 0, value_parser = maybe_hex::<u32>)]
    linear_sectors: u32,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a blank image and format it.
    Format,
    /// Check and repair the image.
    Chk,
    /// Print usage statistics.
    Info,
    /// List all files.
    Ls,
    /// Print a file to stdout.
    Cat { name: String },
    /// Store a host file in the image, replacing an existing one.
    Put {
        name: String,
        source: PathBuf,
        /// Store as a contiguous linear file.
        #[arg(short, long)]
        linear: bool,
    },
    /// Remove a file.
    Rm { name: String },
    /// Rename a file.
    Mv { old: String, new: String },
    /// Print every sector and page header.
    Dump,
}

fn main() {
    pretty_env_logger::init();

    let args = Args::parse();
    if args.version {
        print_version();
        return;
    }
    let Some(command) = args.command.as_ref() else {
        eprintln!("no command given, see --help");
        process::exit(2);
    };

    if let Err(err) = exec(&args, command) {
        log::error!("{}", err);
        eprintln!("error: {}", err);
        process::exit(1);
    }
}

fn print_version() {
    let crate_name = clap::crate_name!();
    let crate_version = clap::crate_version!();
    println!("{} {}", crate_name, crate_version);
}

fn config(args: &Args) -> Config {
    Config::new(args.sectors, args.sector_size, args.page_size)
        .with_linear_sectors(args.linear_sectors)
}

fn image_size(config: &Config) -> u64 {
    u64::from(config.sectors + config.lin_sectors) * u64::from(config.sector_size)
}

fn exec(args: &Args, command: &Command) -> Result<(), Box<dyn StdError>> {
    let config = config(args);
    debug!("layout {:?}", config);

    if let Command::Format = command {
        info!("creating {}", args.image.display());
        let image = ImageFile::create(&args.image, image_size(&config))?;
        let mut fs = ImageFs::new(image, config)?;
        fs.format()?;
        fs.mount()?;
        print_info(&mut fs)?;
        return Ok(());
    }

    let image = ImageFile::open(&args.image, image_size(&config))?;
    let mut fs = ImageFs::new(image, config)?;
    if let Command::Chk = command {
        info!("checking {}", args.image.display());
        fs.chk()?;
        fs.mount()?;
        print_info(&mut fs)?;
        return Ok(());
    }
    fs.mount()?;

    match command {
        Command::Format | Command::Chk => {}
        Command::Info => print_info(&mut fs)?,
        Command::Ls => list(&mut fs)?,
        Command::Cat { name } => cat(&mut fs, name)?,
        Command::Put {
            name,
            source,
            linear,
        } => {
            let data = fs::read(source)?;
            put(&mut fs, name, &data, *linear)?;
        }
        Command::Rm { name } => fs.remove(name)?,
        Command::Mv { old, new } => fs.rename(old, new)?,
        Command::Dump => {
            let mut out = String::new();
            fs.dump(&mut out)?;
            print!("{}", out);
        }
    }
    fs.unmount()?;
    Ok(())
}

fn print_info(fs: &mut ImageFs) -> niffs::Result<()> {
    let info = fs.info()?;
    println!("total bytes   {}", info.total_bytes);
    println!("used bytes    {}", info.used_bytes);
    if info.overflow {
        println!("overflow      yes, run chk");
    }
    if info.lin_total_sectors > 0 {
        println!(
            "linear        {}/{} sectors used, {} free in a row",
            info.lin_used_sectors, info.lin_total_sectors, info.lin_max_conseq_free
        );
    }
    Ok(())
}

fn list(fs: &mut ImageFs) -> niffs::Result<()> {
    let mut dir = fs.opendir()?;
    while let Some(entry) = fs.readdir(&mut dir)? {
        let kind = match entry.ftype {
            FileType::File => "file",
            FileType::Linear => "linear",
            FileType::Other(_) => "?",
        };
        println!(
            "{:5} {:8} {:6} {}",
            entry.obj_id, entry.size, kind, entry.name
        );
    }
    fs.closedir(dir)
}

fn cat(fs: &mut ImageFs, name: &str) -> Result<(), Box<dyn StdError>> {
    let fd = fs.open(name, OpenFlags::RDONLY)?;
    let mut stdout = io::stdout().lock();
    let mut buf = [0; 512];
    loop {
        let n = fs.read(fd, &mut buf)?;
        if n == 0 {
            break;
        }
        stdout.write_all(&buf[..n])?;
    }
    fs.close(fd)?;
    Ok(())
}

fn put(fs: &mut ImageFs, name: &str, data: &[u8], linear: bool) -> Result<(), Box<dyn StdError>> {
    let len = u32::try_from(data.len())?;
    let fd = if linear {
        match fs.remove(name) {
            Ok(()) | Err(niffs::Error::FileNotFound) => {}
            Err(err) => return Err(err.into()),
        }
        fs.mknod_linear(name, len.max(1))?
    } else {
        fs.open(
            name,
            OpenFlags::CREAT | OpenFlags::TRUNC | OpenFlags::RDWR | OpenFlags::APPEND,
        )?
    };
    if data.is_empty() {
        log::warn!("{} is empty and will be dropped by the next chk", name);
    }
    let written = fs.write(fd, data)?;
    fs.close(fd)?;
    info!("stored {} bytes as {}", written, name);
    Ok(())
}
