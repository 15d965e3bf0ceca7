//! Request classification: which caching policy applies to a request.
//!
//! Every inbound request lands in exactly one [`Route`]:
//!
//! | Request                                        | Route                 |
//! |------------------------------------------------|-----------------------|
//! | any non-`GET` method                           | [`Route::Bypass`]     |
//! | `GET`, last segment not a known API function   | [`Route::StaticAsset`]|
//! | `GET .../get_individual`                       | [`Route::Api`] + [`ApiPolicy::CacheFirst`] |
//! | `GET .../get_rights`, `get_rights_origin`, `get_membership` | [`Route::Api`] + [`ApiPolicy::NetworkFirst`] |
//! | `GET` on any other known API function          | [`Route::Api`] + [`ApiPolicy::NetworkOnly`] |

use std::collections::HashSet;

use crate::http::{Method, Request};

/// Caching strategy for an API function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiPolicy {
    /// Serve from cache; only consult the network on a miss.
    CacheFirst,
    /// Always try the network; fall back to cache when it fails.
    NetworkFirst,
    /// Never read or write a cache partition.
    NetworkOnly,
}

impl ApiPolicy {
    /// Looks up the policy for an API function name.
    ///
    /// The default arm makes the table total: a function added to the
    /// configured list without a policy here is never cached.
    pub fn for_function(name: &str) -> Self {
        match name {
            "get_individual" => Self::CacheFirst,
            "get_rights" | "get_rights_origin" | "get_membership" => Self::NetworkFirst,
            // Same as the default arm; listed so the session calls stay uncached by name.
            "authenticate" | "get_ticket_trusted" | "is_ticket_valid" | "logout" => {
                Self::NetworkOnly
            }
            _ => Self::NetworkOnly,
        }
    }
}

/// The classification of a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Not intercepted: forwarded to the network untouched.
    Bypass,
    /// Cache-first on the `files` partition, keyed by pathname.
    StaticAsset,
    /// Handled by the API policy engine on the `api` partition.
    Api(ApiPolicy),
}

/// The set of recognised API function names (last path segments).
#[derive(Debug, Clone)]
pub struct RouteTable {
    api_fns: HashSet<String>,
}

impl RouteTable {
    pub fn new<I, S>(api_fns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            api_fns: api_fns.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns `true` if `name` is a recognised API function.
    pub fn is_api_function(&self, name: &str) -> bool {
        self.api_fns.contains(name)
    }

    /// Classifies `request`.
    pub fn classify(&self, request: &Request) -> Route {
        if request.method() != &Method::Get {
            return Route::Bypass;
        }

        let function = request.last_segment();
        if self.is_api_function(function) {
            Route::Api(ApiPolicy::for_function(function))
        } else {
            Route::StaticAsset
        }
    }
}
