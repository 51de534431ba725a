//! Identifier newtypes.
//!
//! String ids (tenant, site, miner, device) come from the outside world and
//! are never parsed; UUID ids (event, command, key) are minted by us.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// View as a plain `&str`.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Mint a fresh random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

string_id!(
    /// A customer tenant. Partition keys and audit chains are scoped by this.
    TenantId
);
string_id!(
    /// A physical mining site. Collector keys authenticate as a site.
    SiteId
);
string_id!(
    /// A miner as named by the edge. Not guaranteed numeric or unique across sites.
    MinerId
);
string_id!(
    /// An on-prem edge collector device.
    DeviceId
);

uuid_id!(
    /// An outbox/bus event.
    EventId
);
uuid_id!(
    /// A queued miner command.
    CommandId
);
uuid_id!(
    /// A collector API key row (not the secret itself).
    KeyId
);
