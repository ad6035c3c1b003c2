#![no_main]

use std::path::Path;

use libfuzzer_sys::fuzz_target;
use trialkit::config::loader::ConfigLoader;
use trialkit::timeline::Timeline;

fuzz_target!(|data: &[u8]| {
    let Ok(yaml) = std::str::from_utf8(data) else {
        return;
    };
    let loader = ConfigLoader::with_defaults();
    // Anything the loader accepts must also build a timeline
    if let Ok(loaded) = loader.load_str(yaml, Path::new("fuzz.yaml")) {
        assert!(Timeline::new(&loaded.config.trials).is_ok());
    }
});
