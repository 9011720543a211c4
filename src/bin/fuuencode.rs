use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::process;

use clap::Parser;

use fuucode::common::io::{file_mode, read_file};
use fuucode::common::{gnu_name, io_error_msg, reset_sigpipe};
use fuucode::uuencode::{self, UuError};

#[derive(Parser)]
#[command(
    name = "uuencode",
    about = "Encode a binary file as text for transmission over a text-only channel.",
    override_usage = "uuencode [OPTION]... [INFILE] REMOTEFILE",
    after_help = "With no INFILE, or when INFILE is -, read standard input.\n\n\
        REMOTEFILE is the name recorded in the `begin' line; uudecode recreates\n\
        the file under that name. The mode defaults to the permission bits of\n\
        INFILE, or 644 when reading standard input.",
    version
)]
struct Cli {
    /// Permission mode recorded in the `begin' line, in octal
    #[arg(long = "mode", value_name = "OCTAL", value_parser = parse_octal_mode)]
    mode: Option<u32>,

    /// [INFILE] REMOTEFILE
    #[arg(value_name = "FILE", required = true, num_args = 1..=2)]
    files: Vec<String>,
}

/// Parse an octal permission mode such as `644` or `0755`.
fn parse_octal_mode(s: &str) -> Result<u32, String> {
    u32::from_str_radix(s, 8)
        .ok()
        .filter(|&m| m <= 0o7777)
        .ok_or_else(|| format!("invalid mode '{}'", s))
}

fn main() {
    reset_sigpipe();

    let tool_name = gnu_name(env!("CARGO_BIN_NAME"));
    let cli = Cli::parse();

    let (input, remote) = match cli.files.as_slice() {
        [remote] => ("-", remote.as_str()),
        [input, remote] => (input.as_str(), remote.as_str()),
        _ => {
            eprintln!("{}: missing operand", tool_name);
            process::exit(1);
        }
    };

    let stdout = io::stdout();
    let mut out = BufWriter::with_capacity(256 * 1024, stdout.lock());

    let result = if input == "-" {
        let stdin = io::stdin();
        let mut reader = stdin.lock();
        uuencode::encode_stream(&mut reader, remote, cli.mode, &mut out)
    } else {
        process_file(input, remote, cli.mode, &mut out)
    };
    let result = result.and_then(|()| out.flush().map_err(UuError::from));

    match result {
        Ok(()) => {}
        Err(UuError::Io(e)) => {
            if e.kind() == io::ErrorKind::BrokenPipe {
                process::exit(0);
            }
            if input != "-" {
                eprintln!("{}: {}: {}", tool_name, input, io_error_msg(&e));
            } else {
                eprintln!("{}: {}", tool_name, io_error_msg(&e));
            }
            process::exit(1);
        }
        Err(e) => {
            eprintln!("{}: {}", tool_name, e);
            process::exit(1);
        }
    }
}

fn process_file(
    filename: &str,
    remote: &str,
    mode: Option<u32>,
    out: &mut impl Write,
) -> Result<(), UuError> {
    let path = Path::new(filename);
    let data = read_file(path)?;
    let mode = match mode {
        Some(m) => Some(m),
        None => file_mode(path)?,
    };
    uuencode::encode_file(remote, mode, &data, out)
}
