use std::error::Error;

pub type DynError = Box<dyn Error + Send + Sync + 'static>;

/// Wraps a system call and retries it while it fails with EINTR.
pub fn syscall<F, T>(f: F) -> Result<T, nix::Error>
where
    F: Fn() -> Result<T, nix::Error>,
{
    loop {
        match f() {
            Err(nix::Error::EINTR) => (),
            result => return result,
        }
    }
}
