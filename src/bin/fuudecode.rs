use std::io::{self, Write};
use std::path::Path;
use std::process;

use clap::Parser;

use fuucode::common::io::read_file;
use fuucode::common::{gnu_name, io_error_msg, reset_sigpipe};
use fuucode::uudecode::{self, DecodeError, DecodedFile};

#[derive(Parser)]
#[command(
    name = "uudecode",
    about = "Decode a file created by uuencode.",
    after_help = "With no FILE, or when FILE is -, read standard input.\n\n\
        The decoded data is written to the file named in the `begin' line and\n\
        given the mode recorded there, unless --output-file is used. An\n\
        output file of - or /dev/stdout writes to standard output.",
    version
)]
struct Cli {
    /// Write decoded data to OUTFILE instead of the name in the header
    #[arg(short = 'o', long = "output-file", value_name = "OUTFILE")]
    output: Option<String>,

    /// File to decode (reads stdin if omitted or -)
    file: Option<String>,
}

fn main() {
    reset_sigpipe();

    let tool_name = gnu_name(env!("CARGO_BIN_NAME"));
    let cli = Cli::parse();

    let filename = cli.file.as_deref().unwrap_or("-");

    let decoded = match read_input(filename) {
        Ok(d) => d,
        Err(DecodeError::Io(e)) => {
            if filename != "-" {
                eprintln!("{}: {}: {}", tool_name, filename, io_error_msg(&e));
            } else {
                eprintln!("{}: {}", tool_name, io_error_msg(&e));
            }
            process::exit(1);
        }
        Err(e) => {
            let source = if filename == "-" { "standard input" } else { filename };
            eprintln!("{}: {}: {}", tool_name, source, e);
            process::exit(1);
        }
    };

    let dest = cli
        .output
        .as_deref()
        .unwrap_or(decoded.header.name.as_str());

    if let Err(e) = write_output(&decoded, dest) {
        if e.kind() == io::ErrorKind::BrokenPipe {
            process::exit(0);
        }
        eprintln!("{}: {}: {}", tool_name, dest, io_error_msg(&e));
        process::exit(1);
    }
}

fn read_input(filename: &str) -> Result<DecodedFile, DecodeError> {
    if filename == "-" {
        let stdin = io::stdin();
        let mut reader = stdin.lock();
        return uudecode::decode_stream(&mut reader);
    }
    let data = read_file(Path::new(filename))?;
    uudecode::decode_file(&data)
}

fn write_output(decoded: &DecodedFile, dest: &str) -> io::Result<()> {
    if dest == "-" || dest == "/dev/stdout" {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        out.write_all(&decoded.data)?;
        return out.flush();
    }
    uudecode::write_decoded(decoded, Path::new(dest))
}
