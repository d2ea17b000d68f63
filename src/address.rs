//! Word address arithmetic.
//!
//! An address is a device symbol followed by a decimal number (`D100`,
//! `ZR2000`). Array and string operations walk consecutive addresses by
//! incrementing the number: `D100 + 2 = D102`.

use crate::error::ClientError;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    pub device: String,
    pub number: u32,
}

impl Address {
    /// Parse `^[A-Za-z]+[0-9]+$`. Leading zeros in the number are not kept.
    pub fn parse(s: &str) -> Result<Self, ClientError> {
        let split = s
            .find(|c: char| !c.is_ascii_alphabetic())
            .ok_or_else(|| ClientError::InvalidAddress(s.to_string()))?;
        let (device, digits) = s.split_at(split);
        if device.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ClientError::InvalidAddress(s.to_string()));
        }
        let number = digits
            .parse::<u32>()
            .map_err(|_| ClientError::InvalidAddress(s.to_string()))?;
        Ok(Self {
            device: device.to_string(),
            number,
        })
    }

    /// The address `offset` words after this one.
    pub fn offset(&self, offset: usize) -> Result<Self, ClientError> {
        let number = u32::try_from(offset)
            .ok()
            .and_then(|o| self.number.checked_add(o))
            .ok_or_else(|| {
                ClientError::InvalidAddress(format!("{self} + {offset} overflows the address range"))
            })?;
        Ok(Self {
            device: self.device.clone(),
            number,
        })
    }

    /// Last address of a `count`-word block starting here. Fails when the
    /// block runs past the end of the address range.
    pub fn last(&self, count: usize) -> Result<Self, ClientError> {
        self.offset(count.saturating_sub(1))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.device, self.number)
    }
}

impl std::str::FromStr for Address {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Convenience: `increment("D3030", 2) == "D3032"`.
pub fn increment(address: &str, offset: usize) -> Result<String, ClientError> {
    Ok(Address::parse(address)?.offset(offset)?.to_string())
}
