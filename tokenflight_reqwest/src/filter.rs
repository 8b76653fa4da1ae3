//! Predicates deciding which requests receive the access token
//!
//! These can be composed with [`PredicateBooleanExt`][predicates::prelude::PredicateBooleanExt]
//! to express more complex requirements.

use std::{fmt, net::IpAddr};

use predicates::{prelude::*, reflection};
use reqwest::Request;

fn mismatch<'a>(
    predicate: &'a dyn reflection::PredicateReflection,
    expected: bool,
    result: bool,
    product: &'static str,
    value: impl Into<String>,
) -> Option<reflection::Case<'a>> {
    if result == expected {
        return None;
    }

    Some(
        reflection::Case::new(Some(predicate), result)
            .add_product(reflection::Product::new(product, value.into())),
    )
}

/// Only attach an access token if the request is being sent over HTTPS
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case<'_>> {
        mismatch(self, expected, self.eval(req), "scheme", req.url().scheme())
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Only attach an access token if the request is being sent to the exact host specified
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Construct a new predicate from a host string
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl Predicate<Request> for ExactHostMatch {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().host_str() == Some(&self.host)
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case<'_>> {
        let host = req.url().host_str().unwrap_or("<no host>");
        mismatch(self, expected, self.eval(req), "host", host)
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}
impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host == {}", self.host)
    }
}

/// Only attach an access token if the request is being sent to this machine
///
/// Matches `localhost` and any loopback address. Combined with
/// [`HttpsOnly`], this allows plain HTTP against a local development server.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoopbackHost;

impl Predicate<Request> for LoopbackHost {
    fn eval(&self, req: &Request) -> bool {
        let Some(host) = req.url().host_str() else {
            return false;
        };

        host.eq_ignore_ascii_case("localhost")
            || host
                .trim_start_matches('[')
                .trim_end_matches(']')
                .parse::<IpAddr>()
                .map_or(false, |ip| ip.is_loopback())
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case<'_>> {
        let host = req.url().host_str().unwrap_or("<no host>");
        mismatch(self, expected, self.eval(req), "host", host)
    }
}

impl reflection::PredicateReflection for LoopbackHost {}
impl fmt::Display for LoopbackHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("host is loopback")
    }
}
