use streamcap_core::{CaptureConfig, LauncherFactory};

/// Platform-independent factory that selects the launcher implementation at compile time
pub struct PlatformLauncherFactory;

impl LauncherFactory for PlatformLauncherFactory {
    #[cfg(unix)]
    type Launcher = streamcap_unix::UnixLauncher;

    fn create_launcher(config: &CaptureConfig) -> Self::Launcher {
        #[cfg(unix)]
        return streamcap_unix::UnixLauncherFactory::create_launcher(config);
    }

    fn platform_name() -> &'static str {
        #[cfg(unix)]
        return streamcap_unix::UnixLauncherFactory::platform_name();
    }
}

#[cfg(not(unix))]
compile_error!("Unsupported platform: only Unix is currently supported");

/// Launcher type picked for this platform
pub type PlatformLauncher = <PlatformLauncherFactory as LauncherFactory>::Launcher;
