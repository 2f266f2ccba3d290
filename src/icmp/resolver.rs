use std::ffi::{CStr, CString};
use std::io;
use std::net::Ipv4Addr;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace};

/// A failed name lookup, classified by whether it tells us something about the target (it does
///  not exist) or about the local resolver setup.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("host {0} not found")]
    HostNotFound(String),
    #[error("resolver failure for {host}: {message}")]
    Resolver { host: String, message: String },
    #[error("resolver i/o failure for {host}: {source}")]
    Io { host: String, source: io::Error },
}

const MAX_TRY_AGAIN_ATTEMPTS: u32 = 5;
const TRY_AGAIN_DELAY: Duration = Duration::from_millis(100);

/// Resolves a probe target to an IPv4 address. Dotted-quad literals are used as they are, saving
///  a lookup; everything else goes through the system resolver (hosts file, DNS, ...).
pub async fn resolve_target(host: &str) -> Result<Ipv4Addr, ResolveError> {
    if let Ok(addr) = host.parse::<Ipv4Addr>() {
        return Ok(addr);
    }

    let owned_host = host.to_string();
    match tokio::task::spawn_blocking(move || lookup_ipv4(&owned_host)).await {
        Ok(result) => result,
        Err(e) => Err(ResolveError::Resolver {
            host: host.to_string(),
            message: format!("lookup task failed: {}", e),
        }),
    }
}

/// Blocking lookup via getaddrinfo(3), restricted to IPv4. A temporary failure ('try again')
///  is retried a bounded number of times rather than reported.
fn lookup_ipv4(host: &str) -> Result<Ipv4Addr, ResolveError> {
    let c_host = CString::new(host)
        .map_err(|_| ResolveError::HostNotFound(host.to_string()))?;

    // SAFETY: addrinfo is a plain C struct for which all-zero is the documented 'no hints' value
    let mut hints: libc::addrinfo = unsafe { std::mem::zeroed() };
    hints.ai_family = libc::AF_INET;
    hints.ai_socktype = libc::SOCK_DGRAM;

    let mut attempt = 0;
    loop {
        attempt += 1;

        let mut result: *mut libc::addrinfo = std::ptr::null_mut();
        // SAFETY: all pointers are valid for the duration of the call; `result` is only
        //  dereferenced and freed on success
        let rc = unsafe { libc::getaddrinfo(c_host.as_ptr(), std::ptr::null(), &hints, &mut result) };

        match rc {
            0 => {
                // SAFETY: getaddrinfo succeeded, so `result` is a valid list that we free exactly once
                let addr = unsafe {
                    let addr = first_ipv4(result);
                    libc::freeaddrinfo(result);
                    addr
                };
                trace!("resolved {} to {:?}", host, addr);
                return addr.ok_or_else(|| ResolveError::HostNotFound(host.to_string()));
            }
            libc::EAI_AGAIN if attempt < MAX_TRY_AGAIN_ATTEMPTS => {
                debug!("temporary resolver failure for {} (attempt {}) - retrying", host, attempt);
                std::thread::sleep(TRY_AGAIN_DELAY);
            }
            other => return Err(classify_lookup_failure(host, other)),
        }
    }
}

/// glibc's `EAI_ADDRFAMILY` (<netdb.h>, `__USE_GNU`); not exported by the `libc` crate.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
const EAI_ADDRFAMILY: libc::c_int = -9;

/// Maps a getaddrinfo(3) error code to what it says about the target. Must be called right
///  after the failing call, since `EAI_SYSTEM` refers to `errno`.
fn classify_lookup_failure(host: &str, rc: libc::c_int) -> ResolveError {
    match rc {
        // the name does not exist, or has no IPv4 address
        libc::EAI_NONAME | libc::EAI_FAIL => ResolveError::HostNotFound(host.to_string()),
        #[cfg(all(target_os = "linux", target_env = "gnu"))]
        libc::EAI_NODATA | EAI_ADDRFAMILY => ResolveError::HostNotFound(host.to_string()),
        libc::EAI_SYSTEM => ResolveError::Io {
            host: host.to_string(),
            source: io::Error::last_os_error(),
        },
        other => ResolveError::Resolver {
            host: host.to_string(),
            message: gai_message(other),
        },
    }
}

/// SAFETY: `list` must be a valid result of getaddrinfo
unsafe fn first_ipv4(list: *const libc::addrinfo) -> Option<Ipv4Addr> {
    let mut cur = list;
    while let Some(info) = cur.as_ref() {
        if info.ai_family == libc::AF_INET && !info.ai_addr.is_null() {
            let sin = &*(info.ai_addr as *const libc::sockaddr_in);
            return Some(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)));
        }
        cur = info.ai_next;
    }
    None
}

fn gai_message(rc: libc::c_int) -> String {
    // SAFETY: gai_strerror returns a pointer to a static, NUL terminated string
    unsafe { CStr::from_ptr(libc::gai_strerror(rc)) }
        .to_string_lossy()
        .into_owned()
}


#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case("127.0.0.1", Ipv4Addr::LOCALHOST)]
    #[case("10.1.2.3", Ipv4Addr::new(10, 1, 2, 3))]
    #[tokio::test]
    async fn test_literal_skips_lookup(#[case] host: &str, #[case] expected: Ipv4Addr) {
        assert_eq!(resolve_target(host).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_resolve_localhost_name() {
        assert_eq!(resolve_target("localhost").await.unwrap(), Ipv4Addr::LOCALHOST);
    }

    #[tokio::test]
    async fn test_embedded_nul_is_not_found() {
        assert!(matches!(resolve_target("local\0host").await, Err(ResolveError::HostNotFound(_))));
    }

    #[rstest]
    #[case::no_name(libc::EAI_NONAME)]
    #[case::fail(libc::EAI_FAIL)]
    fn test_classify_host_not_found(#[case] rc: libc::c_int) {
        assert!(matches!(classify_lookup_failure("gw", rc), ResolveError::HostNotFound(host) if host == "gw"));
    }

    /// a name that exists, but without an IPv4 address
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[rstest]
    #[case::no_data(libc::EAI_NODATA)]
    #[case::address_family(EAI_ADDRFAMILY)]
    fn test_classify_no_address_as_host_not_found(#[case] rc: libc::c_int) {
        assert!(matches!(classify_lookup_failure("gw", rc), ResolveError::HostNotFound(host) if host == "gw"));
    }

    #[rstest]
    #[case::bad_flags(libc::EAI_BADFLAGS)]
    #[case::memory(libc::EAI_MEMORY)]
    #[case::exhausted_retries(libc::EAI_AGAIN)]
    fn test_classify_resolver_failure(#[case] rc: libc::c_int) {
        match classify_lookup_failure("gw", rc) {
            ResolveError::Resolver { host, message } => {
                assert_eq!(host, "gw");
                assert!(!message.is_empty());
            }
            other => panic!("unexpected classification {:?}", other),
        }
    }

    #[test]
    fn test_classify_system_error() {
        assert!(matches!(classify_lookup_failure("gw", libc::EAI_SYSTEM), ResolveError::Io { .. }));
    }
}
