//! Kernel state locking mechanism
use core::ops;

use crate::{Kernel, Port};

/// Enter a CPU Lock state and get an RAII guard.
///
/// The guard borrows the whole kernel, so holding it is the only way for
/// kernel-internal functions to reach the kernel state.
pub(crate) fn lock_cpu<P: Port>(kernel: &mut Kernel<P>) -> CpuLockGuard<'_, P> {
    kernel.port.enter_cpu_lock();
    CpuLockGuard { kernel }
}

/// RAII guard for a CPU Lock state.
///
/// [`Kernel`] can be borrowed from this type.
pub(crate) struct CpuLockGuard<'a, P: Port> {
    kernel: &'a mut Kernel<P>,
}

impl<P: Port> Drop for CpuLockGuard<'_, P> {
    fn drop(&mut self) {
        self.kernel.port.leave_cpu_lock();
    }
}

impl<P: Port> ops::Deref for CpuLockGuard<'_, P> {
    type Target = Kernel<P>;
    fn deref(&self) -> &Self::Target {
        self.kernel
    }
}

impl<P: Port> ops::DerefMut for CpuLockGuard<'_, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.kernel
    }
}

#[cfg(test)]
mod tests {
    use crate::{utils::mock::MockPort, Kernel, KernelCfg};

    #[test]
    fn guard_balances_cpu_lock() {
        let mut kernel = Kernel::new(MockPort::default(), KernelCfg::new());
        {
            let lock = super::lock_cpu(&mut kernel);
            assert_eq!(lock.port.cpu_lock_depth, 1);
        }
        assert_eq!(kernel.port.cpu_lock_depth, 0);
        assert!(kernel.port.cpu_lock_count > 0);
    }
}
