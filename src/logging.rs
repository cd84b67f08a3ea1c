//! Logging setup.
//!
//! Wire traffic is logged at `debug` (`>` outbound, `<` inbound), connection
//! lifecycle at `info`.

use env_logger::{Builder, Env};

/// Install the `env_logger` backend. `RUST_LOG` overrides `level` when set.
/// Calling this more than once is harmless.
pub fn init(level: &str) {
  let result = Builder::from_env(Env::default().default_filter_or(level))
    .format_timestamp_millis()
    .try_init();
  if result.is_err() {
    log::debug!("Logger already initialised");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_init_twice_is_harmless() {
    init("debug");
    init("info");
    log::info!("logging initialised");
  }
}
