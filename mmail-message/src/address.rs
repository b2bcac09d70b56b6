//! Turning header values into bare envelope addresses.

use mailparse::MailAddr;

use crate::error::AddressError;

/// Extracts the bare `local@domain` address from a header value such as
/// `"Jane Doe" <jane@example.com>`.
pub trait AddressParser: Send + Sync {
    /// # Errors
    ///
    /// [`AddressError`] when `raw` is not exactly one valid mailbox.
    fn parse(&self, raw: &str) -> Result<String, AddressError>;
}

/// [`AddressParser`] backed by `mailparse`. Accepts exactly one mailbox.
#[derive(Debug, Default, Clone, Copy)]
pub struct MailboxParser;

impl AddressParser for MailboxParser {
    fn parse(&self, raw: &str) -> Result<String, AddressError> {
        let malformed = |reason: String| AddressError::Malformed {
            address: raw.to_string(),
            reason,
        };

        let mut list = mailparse::addrparse(raw).map_err(|err| malformed(err.to_string()))?;
        if list.len() != 1 {
            return Err(AddressError::NotSingleMailbox {
                address: raw.to_string(),
                found: list.len(),
            });
        }

        match list.remove(0) {
            MailAddr::Single(info) => match info.addr.rsplit_once('@') {
                Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(info.addr),
                _ => Err(malformed("missing '@' in mailbox".to_string())),
            },
            MailAddr::Group(group) => Err(AddressError::NotSingleMailbox {
                address: raw.to_string(),
                found: group.addrs.len(),
            }),
        }
    }
}
