/// Property-based tests using proptest
/// Invariants of the feed parser, classifier and pricing that hold for all inputs
use proptest::prelude::*;

use lead_marketplace_api::claims::PriceBreakdown;
use lead_marketplace_api::classifier::{infer_tier, location_for_phone, quality_score};
use lead_marketplace_api::config::PricingConfig;
use lead_marketplace_api::feed_parser::{normalize_phone, parse_feed, MIN_PHONE_DIGITS};
use lead_marketplace_api::models::LeadTier;

const HEADER: &str = "timestamp,direction,to_number,from_number,transcript,summary\n";

// Property: parsing never panics and every emitted phone passes the gate
proptest! {
    #[test]
    fn parser_never_panics(text in "\\PC*") {
        let _ = parse_feed(&text);
    }

    #[test]
    fn emitted_phones_are_digits_only(
        phone in "[0-9 ()+.-]{0,20}",
        transcript in "[a-zA-Z ,\"]{0,40}"
    ) {
        let quoted = transcript.replace('"', "\"\"");
        let text = format!("{}t,inbound,x,{},\"{}\",s\n", HEADER, phone, quoted);
        let parsed = parse_feed(&text);

        for row in &parsed.rows {
            prop_assert!(row.from_number.chars().all(|c| c.is_ascii_digit()));
            prop_assert!(row.from_number.len() >= MIN_PHONE_DIGITS);
            prop_assert_eq!(&row.transcript, transcript.trim());
        }
        prop_assert_eq!(parsed.rows.len() + parsed.rejected.len(), 1);
        prop_assert_eq!(
            parsed.rows.len() == 1,
            normalize_phone(&phone).len() >= MIN_PHONE_DIGITS
        );
    }
}

// Property: scores stay in range and premium wording always wins the tier
proptest! {
    #[test]
    fn score_is_bounded(summary in "\\PC{0,200}", transcript in "\\PC{0,400}") {
        let score = quality_score(&summary, &transcript);
        prop_assert!((60.0..=100.0).contains(&score));
    }

    #[test]
    fn premium_always_platinum(prefix in "[a-z ]{0,30}", suffix in "[a-z ]{0,30}") {
        let summary = format!("{} premium {}", prefix, suffix);
        prop_assert_eq!(infer_tier(&summary, "urgent"), LeadTier::Platinum);
    }

    #[test]
    fn location_is_never_empty(phone in "[0-9]{10,11}") {
        let location = location_for_phone(&phone);
        prop_assert!(!location.city.is_empty());
        prop_assert!(!location.region.is_empty());
    }
}

// Property: totals always add up and tax never goes negative
proptest! {
    #[test]
    fn breakdown_total_adds_up(
        price in prop::sample::select(vec![2500i64, 4500, 7500]),
        rate_bp in 0u32..=2500,
        fee in 0i64..=10_000
    ) {
        let rate = format!("{}.{:04}", rate_bp / 10_000, rate_bp % 10_000);
        let pricing = PricingConfig::new(&rate, fee).unwrap();
        let b = PriceBreakdown::compute(price, &pricing).unwrap();

        prop_assert!(b.tax_cents >= 0);
        prop_assert_eq!(b.total_cents, b.amount_cents + b.tax_cents + b.fee_cents);
        // Within half a cent of the exact product
        let exact = price as f64 * rate_bp as f64 / 10_000.0;
        prop_assert!((b.tax_cents as f64 - exact).abs() <= 0.5 + 1e-9);
    }
}
