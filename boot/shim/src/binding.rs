//! Controller Binding
//!
//! The firmware driver model attaches drivers to controllers through a
//! three-step lifecycle. The shim binds to controllers that load images
//! under a security architectural protocol and publishes its lock protocol
//! there so the loader path routes verification through the shim.

use alloc::vec::Vec;

use thiserror::Error;

use crate::guid::{
    registry, Guid, LOADED_IMAGE_PROTOCOL_GUID, MOK_OWNER_GUID, SECURITY2_PROTOCOL_GUID,
    SECURITY_PROTOCOL_GUID,
};

/// Protocol the shim installs on bound controllers
pub const SHIM_LOCK_PROTOCOL_GUID: Guid = MOK_OWNER_GUID;

/// Opaque firmware handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ControllerHandle(pub usize);

/// Binding failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BindingError {
    /// The controller lacks a required protocol
    #[error("controller is not supported")]
    Unsupported,
    /// The controller is already bound
    #[error("controller already started")]
    AlreadyStarted,
    /// The controller was never bound
    #[error("controller not started")]
    NotStarted,
    /// Child handles must be stopped first
    #[error("{0} child handles still attached")]
    ChildrenAttached(usize),
    /// Installing or removing a protocol failed
    #[error("protocol {0} could not be changed")]
    Protocol(Guid),
}

/// Handle database of the firmware
pub trait ProtocolHost {
    /// Check whether `protocol` is installed on `handle`
    fn has_protocol(&self, handle: ControllerHandle, protocol: &Guid) -> bool;

    /// Install `protocol` on `handle`
    fn install(&mut self, handle: ControllerHandle, protocol: &Guid) -> Result<(), BindingError>;

    /// Remove `protocol` from `handle`
    fn uninstall(&mut self, handle: ControllerHandle, protocol: &Guid) -> Result<(), BindingError>;
}

/// Driver lifecycle
pub trait DriverBinding {
    /// Check if the driver can manage `controller`
    fn supported(
        &self,
        host: &dyn ProtocolHost,
        controller: ControllerHandle,
        remaining_path: Option<&[u8]>,
    ) -> bool;

    /// Bind to `controller`
    fn start(
        &mut self,
        host: &mut dyn ProtocolHost,
        controller: ControllerHandle,
        remaining_path: Option<&[u8]>,
    ) -> Result<(), BindingError>;

    /// Unbind from `controller`
    fn stop(
        &mut self,
        host: &mut dyn ProtocolHost,
        controller: ControllerHandle,
        children: &[ControllerHandle],
    ) -> Result<(), BindingError>;
}

/// Binding of the shim to image-loading controllers
#[derive(Debug, Default)]
pub struct ShimBinding {
    bound: Vec<ControllerHandle>,
}

impl ShimBinding {
    /// Create an unbound driver
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if `controller` is bound
    pub fn is_bound(&self, controller: ControllerHandle) -> bool {
        self.bound.contains(&controller)
    }

    /// Bound controllers in start order
    pub fn bound(&self) -> &[ControllerHandle] {
        &self.bound
    }
}

impl DriverBinding for ShimBinding {
    fn supported(
        &self,
        host: &dyn ProtocolHost,
        controller: ControllerHandle,
        _remaining_path: Option<&[u8]>,
    ) -> bool {
        !self.is_bound(controller)
            && host.has_protocol(controller, &LOADED_IMAGE_PROTOCOL_GUID)
            && (host.has_protocol(controller, &SECURITY2_PROTOCOL_GUID)
                || host.has_protocol(controller, &SECURITY_PROTOCOL_GUID))
    }

    fn start(
        &mut self,
        host: &mut dyn ProtocolHost,
        controller: ControllerHandle,
        remaining_path: Option<&[u8]>,
    ) -> Result<(), BindingError> {
        if self.is_bound(controller) {
            return Err(BindingError::AlreadyStarted);
        }
        if !self.supported(host, controller, remaining_path) {
            return Err(BindingError::Unsupported);
        }

        host.install(controller, &SHIM_LOCK_PROTOCOL_GUID)?;
        self.bound.push(controller);
        log::debug!(
            "Bound controller {:#x} ({})",
            controller.0,
            registry().name_of(&SHIM_LOCK_PROTOCOL_GUID).unwrap_or("shim lock")
        );
        Ok(())
    }

    fn stop(
        &mut self,
        host: &mut dyn ProtocolHost,
        controller: ControllerHandle,
        children: &[ControllerHandle],
    ) -> Result<(), BindingError> {
        let position = self
            .bound
            .iter()
            .position(|bound| *bound == controller)
            .ok_or(BindingError::NotStarted)?;
        // The shim creates no child handles
        if !children.is_empty() {
            return Err(BindingError::ChildrenAttached(children.len()));
        }

        host.uninstall(controller, &SHIM_LOCK_PROTOCOL_GUID)?;
        self.bound.remove(position);
        log::debug!("Unbound controller {:#x}", controller.0);
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[derive(Default)]
    struct Host {
        protocols: BTreeSet<(ControllerHandle, Guid)>,
        read_only: bool,
    }

    impl Host {
        fn with(handle: ControllerHandle, protocols: &[Guid]) -> Self {
            let mut host = Self::default();
            for protocol in protocols {
                host.protocols.insert((handle, *protocol));
            }
            host
        }
    }

    impl ProtocolHost for Host {
        fn has_protocol(&self, handle: ControllerHandle, protocol: &Guid) -> bool {
            self.protocols.contains(&(handle, *protocol))
        }

        fn install(
            &mut self,
            handle: ControllerHandle,
            protocol: &Guid,
        ) -> Result<(), BindingError> {
            if self.read_only {
                return Err(BindingError::Protocol(*protocol));
            }
            self.protocols.insert((handle, *protocol));
            Ok(())
        }

        fn uninstall(
            &mut self,
            handle: ControllerHandle,
            protocol: &Guid,
        ) -> Result<(), BindingError> {
            if self.protocols.remove(&(handle, *protocol)) {
                Ok(())
            } else {
                Err(BindingError::Protocol(*protocol))
            }
        }
    }

    const LOADER: ControllerHandle = ControllerHandle(0x1000);

    #[test]
    fn test_supported_requires_protocols() {
        let binding = ShimBinding::new();
        let host = Host::with(LOADER, &[LOADED_IMAGE_PROTOCOL_GUID, SECURITY2_PROTOCOL_GUID]);
        assert!(binding.supported(&host, LOADER, None));

        let legacy = Host::with(LOADER, &[LOADED_IMAGE_PROTOCOL_GUID, SECURITY_PROTOCOL_GUID]);
        assert!(binding.supported(&legacy, LOADER, None));

        let bare = Host::with(LOADER, &[LOADED_IMAGE_PROTOCOL_GUID]);
        assert!(!binding.supported(&bare, LOADER, None));
        assert!(!binding.supported(&host, ControllerHandle(0x2000), None));
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let mut binding = ShimBinding::new();
        let mut host = Host::with(LOADER, &[LOADED_IMAGE_PROTOCOL_GUID, SECURITY2_PROTOCOL_GUID]);

        binding.start(&mut host, LOADER, None).unwrap();
        assert!(binding.is_bound(LOADER));
        assert!(host.has_protocol(LOADER, &SHIM_LOCK_PROTOCOL_GUID));
        assert!(!binding.supported(&host, LOADER, None));
        assert_eq!(binding.start(&mut host, LOADER, None), Err(BindingError::AlreadyStarted));

        assert_eq!(
            binding.stop(&mut host, LOADER, &[ControllerHandle(7)]),
            Err(BindingError::ChildrenAttached(1))
        );
        binding.stop(&mut host, LOADER, &[]).unwrap();
        assert!(binding.bound().is_empty());
        assert!(!host.has_protocol(LOADER, &SHIM_LOCK_PROTOCOL_GUID));
        assert_eq!(binding.stop(&mut host, LOADER, &[]), Err(BindingError::NotStarted));
    }

    #[test]
    fn test_failed_install_leaves_unbound() {
        let mut binding = ShimBinding::new();
        let mut host = Host::with(LOADER, &[LOADED_IMAGE_PROTOCOL_GUID, SECURITY2_PROTOCOL_GUID]);
        host.read_only = true;

        assert_eq!(
            binding.start(&mut host, LOADER, None),
            Err(BindingError::Protocol(SHIM_LOCK_PROTOCOL_GUID))
        );
        assert!(!binding.is_bound(LOADER));
    }

    #[test]
    fn test_unsupported_start() {
        let mut binding = ShimBinding::new();
        let mut host = Host::default();
        assert_eq!(binding.start(&mut host, LOADER, None), Err(BindingError::Unsupported));
    }

    #[test]
    fn test_binding_through_trait_object() {
        let mut driver: alloc::boxed::Box<dyn DriverBinding> =
            alloc::boxed::Box::new(ShimBinding::new());
        let mut host = Host::with(LOADER, &[LOADED_IMAGE_PROTOCOL_GUID, SECURITY_PROTOCOL_GUID]);
        assert!(driver.supported(&host, LOADER, Some(&[0x7f, 0xff, 0x04, 0x00][..])));
        driver.start(&mut host, LOADER, None).unwrap();
        driver.stop(&mut host, LOADER, &[]).unwrap();
    }
}
