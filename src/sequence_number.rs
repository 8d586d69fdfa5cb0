type SequenceNumberInnerType = u16;

/// Per-round sequence number carried in the ICMP echo header.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct SequenceNumber(SequenceNumberInnerType);

impl SequenceNumber {
    fn start_value_inner_type() -> SequenceNumberInnerType {
        // ICMP sequence numbers start from 1.
        SequenceNumberInnerType::from(1u8)
    }

    #[must_use]
    pub fn start_value() -> SequenceNumber {
        SequenceNumber(Self::start_value_inner_type())
    }

    #[must_use]
    pub fn max_value() -> SequenceNumberInnerType {
        SequenceNumberInnerType::MAX
    }

    #[must_use]
    pub fn next(self) -> Self {
        if self.0 == Self::max_value() {
            Self::start_value()
        } else {
            SequenceNumber(self.0 + 1)
        }
    }
}

impl From<SequenceNumber> for SequenceNumberInnerType {
    fn from(value: SequenceNumber) -> Self {
        value.0
    }
}

impl From<SequenceNumberInnerType> for SequenceNumber {
    fn from(value: SequenceNumberInnerType) -> Self {
        SequenceNumber(value)
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
