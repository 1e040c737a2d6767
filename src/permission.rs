#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Authorization {
    Authorized,
    Denied,
    NotDetermined,
}

/// Camera permission as granted by the operating system.
pub trait PermissionGate: Send + Sync + 'static {
    fn status(&self) -> Authorization;

    /// Prompts the user. Blocks until they answer.
    fn request(&mut self) -> Authorization;
}

/// Permission through `nokhwa` on macOS. Other platforms either grant
/// camera access implicitly or ask inside the browser.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostPermission;

impl PermissionGate for HostPermission {
    fn status(&self) -> Authorization {
        #[cfg(target_os = "macos")]
        {
            if nokhwa::nokhwa_check() {
                Authorization::Authorized
            } else {
                Authorization::NotDetermined
            }
        }

        #[cfg(not(target_os = "macos"))]
        Authorization::Authorized
    }

    fn request(&mut self) -> Authorization {
        #[cfg(target_os = "macos")]
        {
            match nokhwa_initialize_blocking() {
                Ok(()) => Authorization::Authorized,
                Err(reason) => {
                    bevy::log::warn!("camera authorization failed: {reason}");
                    Authorization::Denied
                }
            }
        }

        #[cfg(not(target_os = "macos"))]
        Authorization::Authorized
    }
}

#[cfg(target_os = "macos")]
fn nokhwa_initialize_blocking() -> Result<(), &'static str> {
    let (tx, rx) = std::sync::mpsc::channel();

    nokhwa::nokhwa_initialize(move |success| {
        let _ = tx.send(success);
    });

    match rx.recv() {
        Ok(true) => Ok(()),
        Ok(false) => Err("user denied camera permission"),
        Err(_) => Err("initialization channel closed unexpectedly"),
    }
}

/// Makes sure the camera may be used, prompting when the user was never
/// asked. Returns whether access is granted.
pub(crate) fn ensure_authorized(gate: &mut dyn PermissionGate) -> bool {
    match gate.status() {
        Authorization::Authorized => true,
        Authorization::Denied | Authorization::NotDetermined => {
            gate.request() == Authorization::Authorized
        }
    }
}
