use crate::{PhysicalRange, VirtualAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HalError {
    #[error("out of physical pages")]
    OutOfPages,
    #[error("reservation does not cover {requested} more pages")]
    ReservationExhausted { requested: usize },
    #[error("address {0} is already mapped")]
    AlreadyMapped(VirtualAddress),
    #[error("address {0} is not mapped")]
    NotMapped(VirtualAddress),
    #[error("range {0:?} was not allocated")]
    UnknownRange(PhysicalRange),
}
