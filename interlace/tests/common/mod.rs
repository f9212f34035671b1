use lazy_static::lazy_static;

lazy_static! {
    static ref LOGGER: () = {
        let _ = simplelog::SimpleLogger::init(
            simplelog::LevelFilter::Warn,
            simplelog::Config::default(),
        );
    };
}

/// Install the test logger once per test binary.
pub fn init_logging() {
    lazy_static::initialize(&LOGGER);
}
