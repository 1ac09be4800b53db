mod unix_process;

pub use unix_process::{UnixCaptureProcess, UnixLauncher};

use streamcap_core::{CaptureConfig, LauncherFactory};

pub struct UnixLauncherFactory;

impl LauncherFactory for UnixLauncherFactory {
    type Launcher = UnixLauncher;

    fn create_launcher(config: &CaptureConfig) -> UnixLauncher {
        UnixLauncher::new(config)
    }

    fn platform_name() -> &'static str {
        "Unix"
    }
}
