//! The `fcc` driver: option parsing, per-input compilation, and
//! invocation of the system assembler and linker.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

use fcc::CompilerCtx;
use fcc::arch::{Architecture, Os};

/// How far the driver takes each input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Mode {
  /// Compile, assemble and link.
  #[default]
  Default,
  /// Stop after code generation (`-S`).
  NoAssemble,
  /// Stop after assembling (`-c`).
  NoLink,
  Version,
  Help,
}

/// The parsed command line.
struct Config {
  mode: Mode,
  inputs: Vec<PathBuf>,
  output: Option<PathBuf>,
}

/// Replace (or strip) a path's extension.
fn filext(path: &Path, extension: &str) -> PathBuf {
  let mut out = path.to_owned();
  if extension.is_empty() {
    out.set_extension("");
  } else {
    out.set_extension(extension);
  }
  out
}

fn usage(opts: &getopts::Options) {
  print!("{}", opts.usage("Usage: fcc [options] input..."));
}

fn parse_options(args: &[String]) -> Result<Config, ()> {
  let mut opts = getopts::Options::new();
  opts.optflag("c", "", "Compile and assemble, but do not link");
  opts.optflag("S", "", "Compile only, do not assemble or link");
  opts.optopt("o", "", "Write output to FILE", "FILE");
  opts.optflag("", "version", "Print version information");
  opts.optflag("", "help", "Display this message");

  let matches = match opts.parse(&args[1..]) {
    Ok(matches) => matches,
    Err(fail) => {
      eprintln!("fcc: {fail}");
      return Err(());
    }
  };

  let mode = if matches.opt_present("help") {
    usage(&opts);
    Mode::Help
  } else if matches.opt_present("version") {
    println!("fcc {}", env!("CARGO_PKG_VERSION"));
    Mode::Version
  } else if matches.opt_present("S") {
    Mode::NoAssemble
  } else if matches.opt_present("c") {
    Mode::NoLink
  } else {
    Mode::Default
  };

  let mut output = matches.opt_str("o").map(PathBuf::from);
  let inputs: Vec<PathBuf> = matches.free.iter().map(PathBuf::from).collect();

  if matches!(mode, Mode::Help | Mode::Version) {
    return Ok(Config { mode, inputs, output });
  }

  if inputs.is_empty() {
    eprintln!("fcc: No input files given");
    return Err(());
  }

  // A single output file cannot hold several unlinked results
  if inputs.len() > 1 && output.is_some() && mode != Mode::Default {
    eprintln!("fcc: Multiple input files with no-link option; ignoring '-o'");
    output = None;
  }

  Ok(Config { mode, inputs, output })
}

/// Run a tool, mapping both spawn failures and nonzero exits to `Err`.
fn run_tool(name: &str, mut command: Command) -> Result<(), ()> {
  match command.status() {
    Ok(status) if status.success() => Ok(()),
    Ok(status) => {
      eprintln!("fcc: {name} exited with {status}");
      Err(())
    }
    Err(err) => {
      eprintln!("fcc: failed to run {name}: {err}");
      Err(())
    }
  }
}

fn assemble(arch: &Architecture, asm_path: &Path, obj_path: &Path) -> Result<(), ()> {
  let mut command = Command::new("as");
  command.args(arch.asflags)
    .arg("-o").arg(obj_path)
    .arg(asm_path);
  run_tool("as", command)
}

fn link(arch: &Architecture, objects: &[PathBuf], output: &Path) -> Result<(), ()> {
  let mut command = Command::new("cc");
  command.args(arch.ldflags)
    .arg("-o").arg(output)
    .args(objects);
  run_tool("cc", command)
}

fn drive(config: &Config) -> Result<(), ()> {
  let arch = Architecture::amd64(Os::Linux);
  let search_paths = config.inputs.first()
    .and_then(|p| p.parent())
    .map(Path::to_owned)
    .into_iter()
    .collect();
  let mut ctx = CompilerCtx::new(arch, search_paths);

  let mut objects = vec![];
  let mut intermediates = vec![];

  for input in &config.inputs {
    let asm_path = match (&config.output, config.mode) {
      (Some(output), Mode::NoAssemble) if config.inputs.len() == 1 => output.clone(),
      _ => filext(input, "s"),
    };

    let Some(text) = ctx.compile(input) else {
      return Err(());
    };

    if std::fs::write(&asm_path, text).is_err() {
      eprintln!("fcc: cannot write '{}'", asm_path.display());
      return Err(());
    }

    if config.mode == Mode::NoAssemble {
      continue;
    }

    let obj_path = match (&config.output, config.mode) {
      (Some(output), Mode::NoLink) if config.inputs.len() == 1 => output.clone(),
      _ => filext(input, "o"),
    };
    assemble(&ctx.arch, &asm_path, &obj_path)?;
    intermediates.push(asm_path);
    objects.push(obj_path);
  }

  if config.mode == Mode::Default {
    let output = config.output.clone()
      .unwrap_or_else(|| filext(&config.inputs[0], ""));
    link(&ctx.arch, &objects, &output)?;
    intermediates.extend(objects);
  }

  // Intermediates were a means, not an end
  for path in intermediates {
    let _ = std::fs::remove_file(path);
  }

  Ok(())
}

fn main() -> ExitCode {
  env_logger::init();

  let args: Vec<String> = std::env::args().collect();
  let config = match parse_options(&args) {
    Ok(config) => config,
    Err(()) => return ExitCode::FAILURE,
  };

  match config.mode {
    Mode::Help | Mode::Version => ExitCode::SUCCESS,
    _ => match drive(&config) {
      Ok(()) => ExitCode::SUCCESS,
      Err(()) => ExitCode::FAILURE,
    },
  }
}
