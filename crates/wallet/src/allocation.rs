//! Moving funds between a profile wallet and one of its vehicles or dependents.

use iapos_core::{DomainError, DomainResult, Money};

/// Balances after an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub profile_balance: Money,
    pub target_balance: Money,
}

/// A positive `amount` moves money from the profile to the target; a negative
/// one returns it. Neither side may go below zero.
pub fn allocate(profile_balance: Money, target_balance: Money, amount: Money) -> DomainResult<Allocation> {
    if amount.is_zero() {
        return Err(DomainError::validation("amount must not be zero"));
    }
    let out_of_range = || DomainError::validation("amount is out of range");
    let profile_after = profile_balance.checked_sub(amount).ok_or_else(out_of_range)?;
    let target_after = target_balance.checked_add(amount).ok_or_else(out_of_range)?;

    if profile_after.is_negative() {
        return Err(DomainError::invariant(format!(
            "insufficient profile balance: {profile_balance} available"
        )));
    }
    if target_after.is_negative() {
        return Err(DomainError::invariant(format!(
            "insufficient balance to return: {target_balance} available"
        )));
    }
    Ok(Allocation {
        profile_balance: profile_after,
        target_balance: target_after,
    })
}

/// True when a debit takes the balance from at or above `threshold` to below it.
pub fn falls_below(before: Money, after: Money, threshold: Money) -> bool {
    before >= threshold && after < threshold
}
