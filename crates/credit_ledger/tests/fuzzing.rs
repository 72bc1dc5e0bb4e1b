//! Fuzzing suite for the credit engine
//!
//! Run with: cargo test --test fuzzing
//! Increase cases: PROPTEST_CASES=1000 cargo test --test fuzzing
//!
//! This suite implements:
//! - Whole-engine snapshots for "no mutation on error" checking
//! - Global invariants (conservation, stakes, sorted membership, monotone indices)
//! - Action-based state machine fuzzer over two parameter regimes
//! - Focused property tests
//! - Deterministic seeded fuzzer

use credit_ledger::fees::FeeAggregator;
use credit_ledger::math::SECONDS_PER_YEAR;
use credit_ledger::*;
use proptest::prelude::*;

const ONE: Amount = DECIMAL_PRECISION;
const LIQUIDATOR: Owner = Owner(99);
const OWNERS: u64 = 6;

// ============================================================================
// SECTION 1: PARAMETER REGIMES
// ============================================================================

/// Defaults: capped recovery liquidations, fee exemptions on
fn params_regime_a() -> ProtocolParams {
    ProtocolParams::default()
}

/// Plain MCR liquidations in every mode, no fee exemptions, interest on
/// both regimes
fn params_regime_b() -> ProtocolParams {
    ProtocolParams {
        recovery_liquidation: RecoveryLiquidation::BelowMcr,
        first_position_fee_exempt: false,
        recovery_mode_fee_exempt: false,
        unshielded_interest_rate: ONE / 10,
        ..ProtocolParams::default()
    }
}

// ============================================================================
// SECTION 2: ACTIONS AND STRATEGIES
// ============================================================================

#[derive(Clone, Debug)]
enum Action {
    Open { owner: u64, coll_tenths: u64, debt: u64, shielded: bool },
    Adjust { owner: u64, coll_tenths: i64, debt: i64 },
    Close { owner: u64 },
    SetShielded { owner: u64, shielded: bool },
    Touch { owner: u64 },
    /// `from == 0` sends from the fee vault
    Transfer { from: u64, to: u64, amount: u64 },
    Deposit { owner: u64, amount: u64 },
    Liquidate { owner: u64 },
    LiquidateBatch { max: usize },
    Redeem { owner: u64, amount: u64, max_iterations: usize },
    Claim { owner: u64 },
    SetPrice { price: u64 },
    AdvanceTime { seconds: u64 },
}

fn owner_strategy() -> impl Strategy<Value = u64> {
    1u64..=OWNERS
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        6 => (owner_strategy(), 50u64..2_000, 1_500u64..6_000, any::<bool>()).prop_map(
            |(owner, coll_tenths, debt, shielded)| Action::Open { owner, coll_tenths, debt, shielded }
        ),
        8 => (owner_strategy(), -200i64..200, -1_500i64..1_500)
            .prop_map(|(owner, coll_tenths, debt)| Action::Adjust { owner, coll_tenths, debt }),
        2 => owner_strategy().prop_map(|owner| Action::Close { owner }),
        2 => (owner_strategy(), any::<bool>()).prop_map(|(owner, shielded)| Action::SetShielded { owner, shielded }),
        2 => owner_strategy().prop_map(|owner| Action::Touch { owner }),
        3 => (0u64..=OWNERS, owner_strategy(), 1u64..500)
            .prop_map(|(from, to, amount)| Action::Transfer { from, to, amount }),
        3 => (owner_strategy(), 1u64..3_000).prop_map(|(owner, amount)| Action::Deposit { owner, amount }),
        3 => owner_strategy().prop_map(|owner| Action::Liquidate { owner }),
        2 => (0usize..4).prop_map(|max| Action::LiquidateBatch { max }),
        3 => (owner_strategy(), 1u64..3_000, 0usize..4)
            .prop_map(|(owner, amount, max_iterations)| Action::Redeem { owner, amount, max_iterations }),
        1 => owner_strategy().prop_map(|owner| Action::Claim { owner }),
        4 => (40u64..400).prop_map(|price| Action::SetPrice { price }),
        4 => (0u64..200_000).prop_map(|seconds| Action::AdvanceTime { seconds }),
    ]
}

// ============================================================================
// SECTION 3: STATE MACHINE
// ============================================================================

struct FuzzState {
    engine: DefaultEngine,
    l_coll: Amount,
    l_debt: Amount,
}

impl FuzzState {
    fn new(params: ProtocolParams) -> Self {
        let mut engine = DefaultEngine::new(params, 200 * ONE).unwrap();
        engine.open_position(Owner(1), OpenRequest::new(100 * ONE, 2_000 * ONE)).unwrap();
        engine.open_position(Owner(2), OpenRequest::new(60 * ONE, 3_000 * ONE)).unwrap();
        FuzzState { engine, l_coll: 0, l_debt: 0 }
    }

    fn apply(&mut self, action: &Action) -> Result<()> {
        let engine = &mut self.engine;
        match *action {
            Action::Open { owner, coll_tenths, debt, shielded } => {
                let request = OpenRequest::new(u128::from(coll_tenths) * ONE / 10, u128::from(debt) * ONE);
                let request = if shielded { request.shielded() } else { request };
                engine.open_position(Owner(owner), request).map(|_| ())
            }
            Action::Adjust { owner, coll_tenths, debt } => {
                let debt_change = u128::from(debt.unsigned_abs()) * ONE;
                let coll_change = u128::from(coll_tenths.unsigned_abs()) * ONE / 10;
                let request =
                    if debt > 0 { AdjustRequest::borrow(debt_change) } else { AdjustRequest::repay(debt_change) };
                let request = if coll_tenths >= 0 {
                    request.with_deposit(coll_change)
                } else {
                    request.with_withdrawal(coll_change)
                };
                engine.adjust_position(Owner(owner), request).map(|_| ())
            }
            Action::Close { owner } => engine.close_position(Owner(owner)).map(|_| ()),
            Action::SetShielded { owner, shielded } => engine.set_shielded(Owner(owner), shielded),
            Action::Touch { owner } => engine.touch(Owner(owner)).map(|_| ()),
            Action::Transfer { from, to, amount } => {
                let from = if from == 0 { Owner::FEE_VAULT } else { Owner(from) };
                engine.token.transfer(from, Owner(to), u128::from(amount) * ONE)
            }
            Action::Deposit { owner, amount } => engine.deposit_to_absorption(Owner(owner), u128::from(amount) * ONE),
            Action::Liquidate { owner } => engine.liquidate(Owner(owner), LIQUIDATOR).map(|_| ()),
            Action::LiquidateBatch { max } => engine.liquidate_batch(max, LIQUIDATOR).map(|_| ()),
            Action::Redeem { owner, amount, max_iterations } => {
                engine.redeem(Owner(owner), u128::from(amount) * ONE, max_iterations, ONE).map(|_| ())
            }
            Action::Claim { owner } => engine.claim_collateral(Owner(owner)).map(|_| ()),
            Action::SetPrice { price } => {
                engine.set_price(u128::from(price) * ONE);
                Ok(())
            }
            Action::AdvanceTime { seconds } => {
                engine.advance_time(seconds);
                Ok(())
            }
        }
    }

    /// Execute an action and verify invariants
    fn execute(&mut self, action: &Action, step: usize) {
        let context = format!("Step {} ({:?})", step, action);
        let snapshot = self.engine.clone();

        match self.apply(action) {
            Ok(()) => self.assert_global_invariants(&context),
            Err(e) => assert_eq!(self.engine, snapshot, "{}: rejected with {:?} but state changed", context, e),
        }
    }

    fn assert_global_invariants(&mut self, context: &str) {
        let engine = &self.engine;

        assert!(
            engine.check_conservation(),
            "{}: conservation violated: active {:?}, default {:?}, supply {}",
            context,
            engine.active_pool,
            engine.default_pool,
            engine.token.total_supply()
        );
        assert!(
            engine.check_stake_consistency(),
            "{}: total stakes {} differ from the active sum",
            context,
            engine.rewards.total_stakes
        );
        assert!(engine.check_sorted_membership(), "{}: sorted index out of step", context);
        assert!(engine.check_sorted_order(), "{}: sorted index out of NICR order", context);

        assert!(engine.rewards.l_coll >= self.l_coll, "{}: L_Coll decreased", context);
        assert!(engine.rewards.l_debt >= self.l_debt, "{}: L_Debt decreased", context);
        self.l_coll = engine.rewards.l_coll;
        self.l_debt = engine.rewards.l_debt;

        assert!(engine.fees.base_rate <= ONE, "{}: base rate above 100%", context);
        assert_eq!(
            engine.absorption.total_deposits(),
            engine.balance_of(Owner::ABSORPTION_POOL),
            "{}: absorption deposits not backed by credit",
            context
        );

        for position in engine.positions.iter_active() {
            assert!(
                position.debt >= engine.params.gas_compensation,
                "{}: {} below gas reserve",
                context,
                position.owner
            );
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn fuzz_state_machine_regime_a(actions in prop::collection::vec(action_strategy(), 20..80)) {
        let mut state = FuzzState::new(params_regime_a());
        for (step, action) in actions.iter().enumerate() {
            state.execute(action, step);
        }
    }

    #[test]
    fn fuzz_state_machine_regime_b(actions in prop::collection::vec(action_strategy(), 20..80)) {
        let mut state = FuzzState::new(params_regime_b());
        for (step, action) in actions.iter().enumerate() {
            state.execute(action, step);
        }
    }
}

// ============================================================================
// SECTION 4: FOCUSED PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    // Switching regimes never changes the entire debt
    #[test]
    fn fuzz_prop_shield_toggle_neutral(
        coll in 50u64..200,
        debt in 1_800u64..4_000,
        seconds in 0u64..SECONDS_PER_YEAR,
    ) {
        let mut engine = DefaultEngine::new(ProtocolParams::default(), 200 * ONE).unwrap();
        engine.open_position(Owner(1), OpenRequest::new(100 * ONE, 2_000 * ONE)).unwrap();
        engine.open_position(Owner(2), OpenRequest::new(u128::from(coll) * ONE, u128::from(debt) * ONE)).unwrap();

        let before = engine.entire_position(Owner(2)).unwrap().debt;
        engine.set_shielded(Owner(2), true).unwrap();
        prop_assert_eq!(engine.entire_position(Owner(2)).unwrap().debt, before);

        engine.advance_time(seconds);
        let accrued = engine.entire_position(Owner(2)).unwrap().debt;
        prop_assert!(accrued >= before);
        engine.set_shielded(Owner(2), false).unwrap();
        prop_assert_eq!(engine.entire_position(Owner(2)).unwrap().debt, accrued);
        prop_assert!(engine.check_conservation());
    }

    // A second touch has nothing left to apply
    #[test]
    fn fuzz_prop_touch_idempotent(price in 60u64..109, seconds in 0u64..1_000_000) {
        let mut engine = DefaultEngine::new(ProtocolParams::default(), 200 * ONE).unwrap();
        engine.open_position(Owner(2), OpenRequest::new(110 * ONE, 2_000 * ONE)).unwrap();
        engine.open_position(Owner(3), OpenRequest::new(100 * ONE, 2_000 * ONE).shielded()).unwrap();
        engine.open_position(Owner(1), OpenRequest::new(221 * ONE / 10, 2_000 * ONE)).unwrap();

        engine.set_price(u128::from(price) * ONE);
        engine.liquidate(Owner(1), LIQUIDATOR).unwrap();
        engine.advance_time(seconds);

        let first = engine.touch(Owner(3)).unwrap();
        prop_assert!(!first.rewards.is_zero());
        let second = engine.touch(Owner(3)).unwrap();
        prop_assert_eq!(second, Materialized::default());
        prop_assert!(engine.check_conservation());
    }

    // The fee clock only moves after a full minute
    #[test]
    fn fuzz_prop_fee_clock(gap in 0u64..600) {
        let mut engine = DefaultEngine::new(ProtocolParams::default(), 200 * ONE).unwrap();
        engine.open_position(Owner(1), OpenRequest::new(110 * ONE, 2_000 * ONE)).unwrap();

        engine.set_time(10_000);
        engine.borrow_credit(Owner(1), 100 * ONE, ONE).unwrap();
        engine.advance_time(gap);
        engine.borrow_credit(Owner(1), 100 * ONE, ONE).unwrap();

        let expected = if gap >= 60 { 10_000 + gap } else { 10_000 };
        prop_assert_eq!(engine.fees.last_fee_operation_time, expected);
    }

    // Decay never raises the base rate
    #[test]
    fn fuzz_prop_base_rate_decays(base_rate in 0u128..=ONE, minutes in 0u64..1_000_000) {
        let params = ProtocolParams::default();
        let fees = FeeAggregator { base_rate, last_fee_operation_time: 0 };
        let decayed = fees.decayed_base_rate(minutes * 60, &params).unwrap();
        prop_assert!(decayed <= base_rate);
    }

    // Rejected opens leave the engine untouched
    #[test]
    fn fuzz_prop_rejected_open_is_noop(coll_tenths in 1u64..400, debt in 0u64..6_000, price in 40u64..400) {
        let mut engine = DefaultEngine::new(ProtocolParams::default(), 200 * ONE).unwrap();
        engine.open_position(Owner(1), OpenRequest::new(100 * ONE, 2_000 * ONE)).unwrap();
        engine.set_price(u128::from(price) * ONE);

        let before = engine.clone();
        let request = OpenRequest::new(u128::from(coll_tenths) * ONE / 10, u128::from(debt) * ONE);
        match engine.open_position(Owner(2), request) {
            Ok(receipt) => {
                prop_assert!(receipt.icr >= engine.params.mcr);
                prop_assert!(engine.check_conservation());
            }
            Err(_) => prop_assert_eq!(&engine, &before),
        }
    }
}

// ============================================================================
// SECTION 5: DETERMINISTIC SEEDED FUZZER
// ============================================================================

/// xorshift64, enough to drive reproducible action sequences
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Rng(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1)
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn u64(&mut self, lo: u64, hi: u64) -> u64 {
        lo + self.next() % (hi - lo)
    }

    fn i64(&mut self, lo: i64, hi: i64) -> i64 {
        lo + (self.next() % (hi - lo) as u64) as i64
    }

    fn bool(&mut self) -> bool {
        self.next() & 1 == 1
    }
}

fn random_action(rng: &mut Rng) -> Action {
    let owner = rng.u64(1, OWNERS + 1);
    match rng.u64(0, 13) {
        0 | 1 => Action::Open {
            owner,
            coll_tenths: rng.u64(50, 2_000),
            debt: rng.u64(1_500, 6_000),
            shielded: rng.bool(),
        },
        2 | 3 => Action::Adjust { owner, coll_tenths: rng.i64(-200, 200), debt: rng.i64(-1_500, 1_500) },
        4 => Action::Close { owner },
        5 => Action::SetShielded { owner, shielded: rng.bool() },
        6 => Action::Transfer { from: rng.u64(0, OWNERS + 1), to: owner, amount: rng.u64(1, 500) },
        7 => Action::Deposit { owner, amount: rng.u64(1, 3_000) },
        8 => Action::Liquidate { owner },
        9 => Action::LiquidateBatch { max: rng.u64(0, 4) as usize },
        10 => Action::Redeem { owner, amount: rng.u64(1, 3_000), max_iterations: rng.u64(0, 4) as usize },
        11 => Action::SetPrice { price: rng.u64(40, 400) },
        _ => Action::AdvanceTime { seconds: rng.u64(0, 200_000) },
    }
}

fn run_deterministic_fuzzer(params: ProtocolParams, seeds: std::ops::Range<u64>, steps: usize) {
    for seed in seeds {
        let mut rng = Rng::new(seed);
        let mut state = FuzzState::new(params.clone());
        for step in 0..steps {
            let action = random_action(&mut rng);
            state.execute(&action, step);
        }
    }
}

#[test]
fn fuzz_deterministic_regime_a() {
    run_deterministic_fuzzer(params_regime_a(), 1..40, 150);
}

#[test]
fn fuzz_deterministic_regime_b() {
    run_deterministic_fuzzer(params_regime_b(), 1..40, 150);
}
