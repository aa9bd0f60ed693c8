//! Relocator call convention.
//!
//! The invoker hands the relocator the table address, the region at its new base and an
//! optional register mask, then turns the outcome into what the calling program does next:
//! branch to the relocated transfer address, carry on, or halt.

use crate::arch::AddressModel;
use crate::layout::Region;
use crate::registers::{RegisterMask, RegisterSaveArea};
use crate::relocator::{RelocError, Relocation, Relocator};

/// What the caller should do after relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Relocation succeeded; branch to this address.
    Transfer(u64),
    /// Relocation succeeded without a transfer address; fall through.
    Continue,
    /// Relocation failed. With no operating system to report to, the program stops.
    Halt(RelocError),
}

impl Disposition {
    /// The relocator return code this disposition was derived from.
    pub fn return_code(&self) -> u8 {
        match self {
            Disposition::Transfer(_) => crate::relocator::RC_TRANSFER,
            Disposition::Continue => crate::relocator::RC_NO_TRANSFER,
            Disposition::Halt(err) => err.return_code(),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Disposition::Halt(_))
    }
}

impl From<Result<Relocation, RelocError>> for Disposition {
    fn from(result: Result<Relocation, RelocError>) -> Self {
        match result {
            Ok(Relocation {
                transfer_address: Some(address),
                ..
            }) => Disposition::Transfer(address),
            Ok(_) => Disposition::Continue,
            Err(err) => Disposition::Halt(err),
        }
    }
}

/// Calls a relocator on behalf of a starting program.
pub struct Invoker<'r, A: AddressModel> {
    relocator: &'r Relocator<A>,
}

impl<'r, A: AddressModel> Invoker<'r, A> {
    pub fn new(relocator: &'r Relocator<A>) -> Self {
        Self { relocator }
    }

    /// Relocates `region`, now at `region.base`, using the table at `table`.
    ///
    /// Registers selected by `mask` are adjusted in `save_area`. A missing or empty mask
    /// leaves the save area alone.
    pub fn invoke<D>(
        &self,
        region: &mut Region<D>,
        table: u64,
        mask: Option<RegisterMask>,
        save_area: &mut RegisterSaveArea,
    ) -> Disposition
    where
        D: AsRef<[u8]> + AsMut<[u8]>,
    {
        let registers = mask
            .filter(|mask| !mask.is_empty())
            .map(|mask| (save_area, mask));
        let disposition = Disposition::from(self.relocator.relocate(region, table, registers));
        match &disposition {
            Disposition::Halt(err) => {
                tracing::error!("relocation failed with code {}: {}", err.return_code(), err)
            }
            other => tracing::info!("relocation succeeded with code {}", other.return_code()),
        }
        disposition
    }
}
