use std::sync::Once;

static INIT: Once = Once::new();

pub fn init() {
    INIT.call_once(|| {
        // RUST_LOG wins; kernel submissions log at debug
        let env = env_logger::Env::default().default_filter_or("debug");

        let _ = env_logger::Builder::from_env(env).is_test(true).try_init();
    });
}
