//! Verified module loader: an opaque admission gate for driver/module
//! images. A module is either admitted, after which it may register
//! timer/IPI handlers, or rejected; verification itself is left opaque, so
//! this names the seam without shipping a signature scheme. A
//! `CapabilityToken` queue keyed off `ed25519-dalek` signature checks was
//! considered and dropped from this core's dependency stack (see
//! DESIGN.md).

use alloc::vec::Vec;

use spin::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationError {
    SignatureInvalid,
    ManifestMalformed,
    QueueFull,
}

#[derive(Debug, Clone)]
pub struct ModuleManifest {
    pub name: &'static str,
    pub entry: u64,
    pub image_len: usize,
}

/// Pluggable verification backend. Real deployments register a concrete
/// implementation (signature check, hash allowlist, ...); this core ships
/// none, keeping verification itself opaque to the loader.
pub trait Verifier: Send + Sync {
    fn verify(&self, manifest: &ModuleManifest, image: &[u8]) -> Result<(), VerificationError>;
}

const MAX_ADMITTED: usize = 32;

struct LoaderState {
    admitted: Vec<ModuleManifest>,
    rejected_count: u64,
}

lazy_static::lazy_static! {
    static ref LOADER: Mutex<LoaderState> = Mutex::new(LoaderState { admitted: Vec::new(), rejected_count: 0 });
}

/// Runs `verifier` against `manifest`/`image` and, on success, admits the
/// module (it may now register timer/IPI handlers through the arch layer).
/// On failure, counts the rejection and returns the reason.
pub fn load_module(verifier: &dyn Verifier, manifest: ModuleManifest, image: &[u8]) -> Result<(), VerificationError> {
    let mut state = LOADER.lock();
    if state.admitted.len() >= MAX_ADMITTED {
        state.rejected_count += 1;
        return Err(VerificationError::QueueFull);
    }
    match verifier.verify(&manifest, image) {
        Ok(()) => {
            crate::log_info!("loader", "admitted module {}", manifest.name);
            state.admitted.push(manifest);
            Ok(())
        }
        Err(e) => {
            state.rejected_count += 1;
            crate::log_warn!("loader", "rejected module {}: {:?}", manifest.name, e);
            Err(e)
        }
    }
}

pub fn rejected_count() -> u64 {
    LOADER.lock().rejected_count
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysAccept;
    impl Verifier for AlwaysAccept {
        fn verify(&self, _m: &ModuleManifest, _i: &[u8]) -> Result<(), VerificationError> {
            Ok(())
        }
    }

    struct AlwaysReject;
    impl Verifier for AlwaysReject {
        fn verify(&self, _m: &ModuleManifest, _i: &[u8]) -> Result<(), VerificationError> {
            Err(VerificationError::SignatureInvalid)
        }
    }

    #[test]
    fn accepted_module_is_admitted() {
        let manifest = ModuleManifest { name: "net-driver", entry: 0x1000, image_len: 64 };
        assert!(load_module(&AlwaysAccept, manifest, &[0u8; 64]).is_ok());
    }

    #[test]
    fn rejected_module_increments_counter() {
        let before = rejected_count();
        let manifest = ModuleManifest { name: "bad-driver", entry: 0x2000, image_len: 64 };
        assert_eq!(load_module(&AlwaysReject, manifest, &[0u8; 64]), Err(VerificationError::SignatureInvalid));
        assert_eq!(rejected_count(), before + 1);
    }
}
