//! Reverse DNS resolution backed by the compute cache.
//!
//! [`DnsResolver`] memoizes reverse lookups in the [`AntiStampedeCache`]
//! under `dns:reverse:{ip}`. Definitive "no name" answers are cached as a
//! placeholder; transient lookup failures are not cached.

use std::ffi::CStr;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use proxylog_store::{AntiStampedeCache, CacheError};

/// Marker value for an absent address; passed through unresolved.
pub const EMPTY_ADDRESS: &str = "<empty>";

const NI_MAXHOST: usize = 1025;

/// Reverse lookup failure.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// The address has no reverse record.
    #[error("no such host")]
    NotFound,

    /// Resolver failure (timeout, server failure, invalid address).
    #[error("lookup failed: {0}")]
    Failed(String),
}

pub type ResolveError = CacheError<LookupError>;

/// Address to host names.
pub trait ReverseLookup: Send + Sync {
    fn lookup(&self, ip: &str) -> Result<Vec<String>, LookupError>;
}

/// System resolver via `getnameinfo(3)` with `NI_NAMEREQD`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemReverseLookup;

impl ReverseLookup for SystemReverseLookup {
    fn lookup(&self, ip: &str) -> Result<Vec<String>, LookupError> {
        let addr: IpAddr = ip
            .parse()
            .map_err(|e| LookupError::Failed(format!("invalid address '{ip}': {e}")))?;
        name_info(SocketAddr::new(addr, 0)).map(|name| vec![name])
    }
}

fn name_info(addr: SocketAddr) -> Result<String, LookupError> {
    let mut host = [0 as libc::c_char; NI_MAXHOST];

    let rc = match addr {
        SocketAddr::V4(v4) => {
            // SAFETY: all-zero is a valid sockaddr_in
            let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(v4.ip().octets()),
            };
            // SAFETY: sin and host outlive the call, lengths match the buffers
            unsafe {
                libc::getnameinfo(
                    (&sin as *const libc::sockaddr_in).cast(),
                    std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                    host.as_mut_ptr(),
                    host.len() as libc::socklen_t,
                    std::ptr::null_mut(),
                    0,
                    libc::NI_NAMEREQD,
                )
            }
        }
        SocketAddr::V6(v6) => {
            // SAFETY: all-zero is a valid sockaddr_in6
            let mut sin6: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_addr = libc::in6_addr {
                s6_addr: v6.ip().octets(),
            };
            // SAFETY: sin6 and host outlive the call, lengths match the buffers
            unsafe {
                libc::getnameinfo(
                    (&sin6 as *const libc::sockaddr_in6).cast(),
                    std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                    host.as_mut_ptr(),
                    host.len() as libc::socklen_t,
                    std::ptr::null_mut(),
                    0,
                    libc::NI_NAMEREQD,
                )
            }
        }
    };

    match rc {
        0 => {
            // SAFETY: getnameinfo NUL-terminates host on success
            let name = unsafe { CStr::from_ptr(host.as_ptr()) };
            Ok(name.to_string_lossy().into_owned())
        }
        libc::EAI_NONAME => Err(LookupError::NotFound),
        other => {
            // SAFETY: gai_strerror returns a static NUL-terminated string
            let reason = unsafe { CStr::from_ptr(libc::gai_strerror(other)) };
            Err(LookupError::Failed(reason.to_string_lossy().into_owned()))
        }
    }
}

/// Placeholder stored for addresses without a reverse record.
pub fn unresolved(ip: &str) -> String {
    format!("<Unresolved: {ip}>")
}

/// Cached reverse resolver.
pub struct DnsResolver {
    cache: Arc<AntiStampedeCache>,
    lookup: Arc<dyn ReverseLookup>,
}

impl DnsResolver {
    pub fn new(cache: Arc<AntiStampedeCache>, lookup: Arc<dyn ReverseLookup>) -> Self {
        Self { cache, lookup }
    }

    /// Resolve `ip` to a host name.
    ///
    /// Several names: the shortest wins (first among equals).
    /// No names or not found: `<Unresolved: ip>` (cached).
    pub fn resolve(&self, ip: &str) -> Result<String, ResolveError> {
        if ip == EMPTY_ADDRESS {
            return Ok(EMPTY_ADDRESS.to_owned());
        }

        self.cache
            .get_or_compute(&format!("dns:reverse:{ip}"), || {
                match self.lookup.lookup(ip) {
                    Ok(names) => Ok(shortest(names).unwrap_or_else(|| unresolved(ip))),
                    Err(LookupError::NotFound) => Ok(unresolved(ip)),
                    Err(e) => Err(e),
                }
            })
    }
}

fn shortest(names: Vec<String>) -> Option<String> {
    names
        .into_iter()
        .reduce(|best, name| if name.len() < best.len() { name } else { best })
}
