use std::fs;
use std::path::Path;

use crate::config::types::Config;
use crate::error::{Result, Sis066Error};

pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let text = fs::read_to_string(path.as_ref()).map_err(|e| {
        Sis066Error::Config(format!("failed to read config file {:?}: {e}", path.as_ref()))
    })?;
    let cfg: Config = toml::from_str(&text)
        .map_err(|e| Sis066Error::Config(format!("failed to parse config: {e}")))?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<()> {
    if cfg.pool.high_water < cfg.pool.initial_pdus {
        return Err(Sis066Error::Config(format!(
            "pool.high_water ({}) must be >= pool.initial_pdus ({})",
            cfg.pool.high_water, cfg.pool.initial_pdus
        )));
    }
    if cfg.pool.pdu_capacity == 0 {
        return Err(Sis066Error::Config("pool.pdu_capacity must be > 0".into()));
    }
    if cfg.arq.retransmit_max_ms < cfg.arq.retransmit_initial_ms {
        return Err(Sis066Error::Config(
            "arq.retransmit_max_ms must be >= arq.retransmit_initial_ms".into(),
        ));
    }
    if cfg.station_address.is_empty() || cfg.station_address.len() > crate::address::MAX_ADDRESS_LEN {
        return Err(Sis066Error::Config(format!(
            "station_address must have 1..={} nibbles, got {}",
            crate::address::MAX_ADDRESS_LEN,
            cfg.station_address.len()
        )));
    }
    if cfg.station_address.iter().any(|&n| n > 0x0F) {
        return Err(Sis066Error::Config("station_address nibbles must be 0..15".into()));
    }
    for peer in &cfg.peer {
        if peer.port == 0 {
            return Err(Sis066Error::Config(format!("peer {} has port 0", peer.host)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_listen_only_file_loads_with_defaults() {
        let f = write_fixture(
            r#"
            [[listen]]
            proto = "sis"
            port = 5066
            "#,
        );
        let cfg = load_from_path(f.path()).unwrap();
        assert_eq!(cfg.listen.len(), 1);
        assert_eq!(cfg.pool.initial_pdus, 64);
        assert_eq!(cfg.arq.max_retransmits, 8);
    }

    #[test]
    fn rejects_inverted_high_water() {
        let f = write_fixture(
            r#"
            [pool]
            initial_pdus = 100
            high_water = 10
            "#,
        );
        assert!(load_from_path(f.path()).is_err());
    }

    #[test]
    fn missing_file_is_config_error() {
        assert!(matches!(
            load_from_path("/nonexistent/path/sis066.toml"),
            Err(Sis066Error::Config(_))
        ));
    }
}
