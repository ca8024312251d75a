//! Ballot weight rules.
//!
//! Linear proposals count a voter's full snapshot power. Quadratic proposals
//! let the voter choose `v` votes at a cost of `v²` power; the tally sums `v`.

use crate::error::{GovernanceError, Result};
use crate::proposal::{Proposal, VotingMode};
use civitas_types::Address;

/// Integer square root using Newton's method.
/// Returns floor(sqrt(n)).
pub fn integer_sqrt(n: u128) -> u128 {
    if n <= 1 {
        return n;
    }

    let mut x = n;
    let mut y = x / 2 + 1;

    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }

    x
}

/// Power spent on `votes` quadratic votes; `None` on overflow.
pub fn quadratic_cost(votes: u128) -> Option<u128> {
    votes.checked_mul(votes)
}

/// Largest vote count a budget of `power` can buy.
pub fn max_votes_from_budget(power: u128) -> u128 {
    integer_sqrt(power)
}

/// Weight a ballot contributes to the tally.
///
/// `requested` is the signed vote count and only matters for quadratic
/// proposals.
pub fn ballot_weight(proposal: &Proposal, voter: &Address, requested: u128) -> Result<u128> {
    let power = proposal.power_of(voter);
    if power == 0 {
        return Err(GovernanceError::NoVotingPower(*voter));
    }

    match proposal.voting_mode {
        VotingMode::Linear => Ok(power),
        VotingMode::Quadratic => {
            if requested == 0 {
                return Err(GovernanceError::InsufficientVotingPower { cost: 0, power });
            }
            match quadratic_cost(requested) {
                Some(cost) if cost <= power => Ok(requested),
                Some(cost) => Err(GovernanceError::InsufficientVotingPower { cost, power }),
                None => Err(GovernanceError::InsufficientVotingPower {
                    cost: u128::MAX,
                    power,
                }),
            }
        }
    }
}
