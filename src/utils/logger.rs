use colored::Colorize;
use env_logger::Builder;
use log::Level;
use std::io::Write;

pub fn setup_logging(verbose: bool) {
    use log::LevelFilter;

    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn) // Default: only warnings from dependencies
        .filter_module(env!("CARGO_PKG_NAME"), level)
        .format(|buf, record| {
            let name = env!("CARGO_PKG_NAME");
            let stamp = chrono::Local::now().format("%H:%M:%S%.3f");
            let line = match record.level() {
                Level::Error | Level::Warn => {
                    let level_str = match record.level() {
                        Level::Warn => "WARN".yellow(),
                        _ => "ERROR".red(),
                    };
                    let path = record.target().to_string().white();
                    format!(
                        "{} [{} {} {}] {}",
                        stamp,
                        name.cyan(),
                        level_str,
                        path,
                        record.args()
                    )
                }
                _ => format!("{} [{}] {}", stamp, name.cyan(), record.args()),
            };
            writeln!(buf, "{}", line)
        })
        .try_init();
}
