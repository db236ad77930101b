mod settings;

pub use settings::{
    Command, Config, LocatorSettings, PtySettings, Settings, TailerSettings, SESSIONS_DIR_ENV,
};
