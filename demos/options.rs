//! Command-line plumbing for the demo binaries: `getopts`-based argument
//! parsing and `env_logger` setup, in the same shape the upstream
//! `examples/utils.rs` provided (that file wasn't part of the tree this
//! crate was built from, so this is a small fresh replacement rather than
//! an adaptation of it).

use getopts::Options;

pub struct Opts {
    pub help: bool,
    pub port: u16,
    pub log_level: String,
    pub lines: Vec<String>,
}

pub fn usage() -> String {
    let mut opts = Options::new();
    add_options(&mut opts);
    opts.usage("Usage: echo-server [options] [LINE]...")
}

fn add_options(opts: &mut Options) {
    opts.optflag("h", "help", "print this help menu");
    opts.optopt("p", "port", "TCP port to listen on (default 7)", "PORT");
    opts.optopt("v", "log-level", "log level: error|warn|info|debug|trace (default warn)", "LEVEL");
}

pub fn parse(args: impl Iterator<Item = String>) -> Result<Opts, String> {
    let mut opts = Options::new();
    add_options(&mut opts);
    let matches = opts.parse(args).map_err(|e| e.to_string())?;

    let port = match matches.opt_str("port") {
        Some(s) => s.parse::<u16>().map_err(|_| format!("invalid port {s:?}"))?,
        None => 7,
    };
    let log_level = matches.opt_str("log-level").unwrap_or_else(|| "warn".into());
    let lines = if matches.free.is_empty() {
        vec!["hello".into(), "world".into()]
    } else {
        matches.free.clone()
    };

    Ok(Opts { help: matches.opt_present("help"), port, log_level, lines })
}

pub fn setup_logging(level: &str) {
    env_logger::Builder::new().parse_filters(level).format_timestamp(None).init();
}
