pub mod client;
pub mod config;
pub mod pool;

/// Build info
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_built_info() {
        assert_eq!(built_info::PKG_NAME, "atomupd");
        assert!(!built_info::BUILT_TIME_UTC.is_empty());
    }
}
