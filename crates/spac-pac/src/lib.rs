//! Compiles an Adblock-syntax block-list into a browser PAC script.
//!
//! The output defines `FindProxyForURL(url, host)` with one `if(...)` test
//! per list entry. Exception (`@@`) entries return `DIRECT` and are hoisted
//! above the proxy entries so they always win. Generation is a pure
//! function of its inputs; callers regenerate from scratch on each refresh.

mod gfwlist;

pub use gfwlist::{generate_pac, translate_rule};
