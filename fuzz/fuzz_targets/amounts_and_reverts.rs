#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use seyield_orchestrator::asset::{format_units, parse_units};
use seyield_orchestrator::orchestrator::{Revert, classify_revert, revert_reason};

#[derive(Debug, Arbitrary)]
struct FuzzInput {
    amount: String,
    decimals: u8,
    receipt_message: String,
}

fuzz_target!(|input: FuzzInput| {
    let decimals = input.decimals % 37;

    // Anything that parses is positive and survives a trip through display.
    if let Ok(value) = parse_units(&input.amount, decimals) {
        assert!(!value.is_zero());
        let shown = format_units(value, decimals);
        assert_eq!(parse_units(&shown, decimals).ok(), Some(value), "{shown}");
    }

    match revert_reason(&input.receipt_message) {
        Some(reason) => {
            assert!(!reason.is_empty());
            let _ = classify_revert(reason);
        }
        None => assert!(
            !input.receipt_message.contains("execution reverted:")
                || input
                    .receipt_message
                    .split_once("execution reverted:")
                    .is_some_and(|(_, rest)| rest.trim().is_empty())
        ),
    }

    let wrapped = format!("execution reverted: InsufficientYield(){}", input.receipt_message);
    assert_eq!(
        revert_reason(&wrapped).map(classify_revert),
        Some(Revert::InsufficientBalance)
    );
});
