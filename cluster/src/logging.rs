use std::io::Write;

use env_logger::{Builder, Env};

/// Initializes `env_logger` with an `info` default, overridable through `RUST_LOG`.
///
/// Lines look like `2024-05-01T10:00:00Z INFO message`.
pub fn init() {
    let _ = builder().try_init();
}

fn builder() -> Builder {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} {} {}",
            buf.timestamp(),
            record.level(),
            record.args()
        )
    });
    builder
}
