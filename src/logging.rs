// Logging setup
//
// env_logger behind the `log` facade. RUST_LOG overrides the default `info`
// level. With `debug.log_to_file` every record also lands in the log file,
// which is where validation layer output ends up for later reading.

use crate::config::Config;
use env_logger::{Builder, Env, Target};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};

/// Initialize logging with optional file output
pub fn init_logging(config: &Config) {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    if config.debug.log_to_file {
        match open_log_file(&config.debug.log_file) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(Tee::new(io::stderr(), file))));
            }
            Err(e) => {
                eprintln!("Could not open log file {}: {}", config.debug.log_file, e);
            }
        }
    }

    builder.init();
}

/// Create/clear the log file and write its header
fn open_log_file(path: &str) -> io::Result<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;

    writeln!(file, "=== vk-triangle log ===")?;
    writeln!(file, "Started: {:?}", std::time::SystemTime::now())?;
    writeln!(file)?;

    Ok(file)
}

/// Writes everything to both sinks
struct Tee<A, B> {
    primary: A,
    secondary: B,
}

impl<A: Write, B: Write> Tee<A, B> {
    fn new(primary: A, secondary: B) -> Self {
        Self { primary, secondary }
    }
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.primary.write_all(buf)?;
        self.secondary.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.primary.flush()?;
        self.secondary.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tee_writes_both_sinks() {
        let mut tee = Tee::new(Vec::new(), Vec::new());
        write!(tee, "[Vulkan] {}", "validation message").unwrap();
        tee.flush().unwrap();

        assert_eq!(tee.primary, b"[Vulkan] validation message");
        assert_eq!(tee.primary, tee.secondary);
    }

    #[test]
    fn test_log_file_header() {
        let path = std::env::temp_dir().join(format!("vk_triangle_log_{}.log", std::process::id()));
        let path_str = path.to_string_lossy().to_string();

        std::fs::write(&path, "stale contents from a previous run").unwrap();
        drop(open_log_file(&path_str).unwrap());

        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(contents.starts_with("=== vk-triangle log ==="));
        assert!(!contents.contains("stale"));
    }
}
