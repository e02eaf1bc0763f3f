//! Interrupt registration.
//!
//! A priority-free analog of `InterruptManager::register_dynamic_handler`'s
//! `BTreeMap<InterruptVector, InterruptHandler>` registry, guarded the same way
//! (`RwLock`, handlers installed with interrupts briefly disabled), but driven through a
//! trait boundary instead of a concrete IDT, and tracking MSI vs. legacy pin delivery
//! per device (§4.A).

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use spin::RwLock;

use crate::error::DevError;

/// How an interrupt reaches the CPU.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IrqKind {
    /// Message-signaled interrupt on the given vector.
    Msi,
    /// Legacy pin-routed interrupt (PIC/IOAPIC line).
    Pin,
}

/// A request to attach a handler to a device's interrupt. `prefer_msi` lets a driver
/// ask for MSI but accept the controller's silent downgrade to pin-routing — the
/// degrade policy spec §4.A requires ("MSI falls back to a shared pin interrupt").
pub struct IrqRequest {
    pub vector: u8,
    pub prefer_msi: bool,
    pub handler: Box<dyn Fn() + Send + Sync>,
}

/// A live registration. Dropping this does not deregister; callers hold it only to
/// inspect which delivery mode they actually got.
#[derive(Clone, Copy, Debug)]
pub struct IrqHandle {
    pub vector: u8,
    pub kind: IrqKind,
}

/// The boundary driver code registers interrupt handlers through. The kernel's real IDT
/// and IOAPIC/MSI-X table live outside this crate (see spec §6); [`PortIoIrqController`]
/// is the degraded-but-functional default used when this crate drives the bus alone.
pub trait IrqController: Sync {
    fn register(&self, request: IrqRequest) -> Result<IrqHandle, DevError>;

    /// Invoked by the kernel's IDT stub on receipt of `vector`; dispatches to every
    /// handler registered for it. Never blocks, never allocates (see spec §5:
    /// "interrupt handlers never suspend").
    fn dispatch(&self, vector: u8);
}

/// Default [`IrqController`]: tracks handlers in a vector-indexed registry, always
/// reporting [`IrqKind::Pin`] delivery (no MSI-X table owner to negotiate with when this
/// crate is the only thing on the bus).
pub struct PortIoIrqController {
    handlers: RwLock<BTreeMap<u8, Box<dyn Fn() + Send + Sync>>>,
}

impl Default for PortIoIrqController {
    fn default() -> Self {
        Self::new()
    }
}

impl PortIoIrqController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(BTreeMap::new()),
        }
    }
}

impl IrqController for PortIoIrqController {
    fn register(&self, request: IrqRequest) -> Result<IrqHandle, DevError> {
        if self.handlers.read().contains_key(&request.vector) {
            return Err(DevError::InvalidArgument);
        }
        self.handlers.write().insert(request.vector, request.handler);
        Ok(IrqHandle {
            vector: request.vector,
            kind: IrqKind::Pin,
        })
    }

    fn dispatch(&self, vector: u8) {
        if let Some(handler) = self.handlers.read().get(&vector) {
            handler();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn register_then_dispatch_invokes_handler() {
        let controller = PortIoIrqController::new();
        static HITS: AtomicUsize = AtomicUsize::new(0);

        let handle = controller
            .register(IrqRequest {
                vector: 0x40,
                prefer_msi: true,
                handler: Box::new(|| {
                    HITS.fetch_add(1, Ordering::SeqCst);
                }),
            })
            .expect("registration should succeed");

        assert_eq!(handle.kind, IrqKind::Pin);
        controller.dispatch(0x40);
        assert_eq!(HITS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_on_unregistered_vector_is_a_no_op() {
        let controller = PortIoIrqController::new();
        controller.dispatch(0x41);
    }

    #[test]
    fn double_registration_on_same_vector_fails() {
        let controller = PortIoIrqController::new();
        controller
            .register(IrqRequest {
                vector: 0x50,
                prefer_msi: false,
                handler: Box::new(|| {}),
            })
            .expect("first registration should succeed");

        let result = controller.register(IrqRequest {
            vector: 0x50,
            prefer_msi: false,
            handler: Box::new(|| {}),
        });
        assert_eq!(result.unwrap_err(), DevError::InvalidArgument);
    }
}
