use anyhow::Result;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Default level: DEBUG for debug builds, INFO otherwise
pub fn default_level() -> Level {
    if cfg!(debug_assertions) {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

/// Level after applying `-v` / `-q` counts to the default
pub fn level_for(verbose: u8, quiet: u8) -> Level {
    const LEVELS: [Level; 5] = [Level::ERROR, Level::WARN, Level::INFO, Level::DEBUG, Level::TRACE];
    let base = LEVELS.iter().position(|l| *l == default_level()).unwrap_or(2) as i32;
    let idx = (base + verbose as i32 - quiet as i32).clamp(0, LEVELS.len() as i32 - 1);
    LEVELS[idx as usize]
}

pub fn init(level: Level) -> Result<()> {
    init_logger(level, false)
}

pub fn init_test() {
    let _ = init_logger(Level::DEBUG, true);
}

fn init_logger(level: Level, with_target: bool) -> Result<()> {
    let subscriber_builder = FmtSubscriber::builder()
        .compact()
        .with_target(with_target)
        .with_writer(std::io::stderr)
        .without_time();
    let subscriber = subscriber_builder.with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for() {
        let base = default_level();
        assert_eq!(level_for(0, 0), base);
        assert_eq!(level_for(0, 10), Level::ERROR);
        assert_eq!(level_for(10, 0), Level::TRACE);
    }
}
