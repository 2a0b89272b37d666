use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::Deserialize;

use crate::error::Error;

pub const STRIPE_API_URL: &str = "https://api.stripe.com";

/// Chargeable intent created at the payment processor for a parcel's cost.
#[derive(Deserialize, Debug, Clone)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

#[derive(Clone)]
pub struct StripeClient {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl StripeClient {
    pub fn new(http: reqwest::Client, secret_key: String, base_url: String) -> Self {
        Self {
            http,
            secret_key,
            base_url,
        }
    }

    pub async fn create_intent(&self, amount_cents: i64) -> Result<PaymentIntent, Error> {
        let intent = self
            .http
            .post(format!("{}/v1/payment_intents", self.base_url))
            .bearer_auth(&self.secret_key)
            .form(&[
                ("amount", amount_cents.to_string()),
                ("currency", "usd".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<PaymentIntent>()
            .await?;

        Ok(intent)
    }
}

/// Parcel costs are stored in whole currency units; the processor charges in
/// cents. Fractional costs round half-up to the nearest cent.
pub fn cost_to_cents(cost: Decimal) -> Result<i64, Error> {
    cost.checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|it| {
            it.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
                .to_i64()
        })
        .ok_or_else(|| Error::InvalidArgument("parcel cost out of range".to_string()))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rust_decimal::Decimal;

    use crate::error::Error;

    use super::cost_to_cents;

    #[test]
    fn test_whole_cost_to_cents() {
        assert_eq!(cost_to_cents(Decimal::from(25)).unwrap(), 2500);
        assert_eq!(cost_to_cents(Decimal::from(0)).unwrap(), 0);
    }

    #[test]
    fn test_fractional_cost_rounds() {
        assert_eq!(
            cost_to_cents(Decimal::from_str_exact("19.99").unwrap()).unwrap(),
            1999
        );
        assert_eq!(
            cost_to_cents(Decimal::from_str_exact("10.005").unwrap()).unwrap(),
            1001
        );
    }

    #[test]
    fn test_out_of_range_cost() {
        let error = cost_to_cents(Decimal::MAX).unwrap_err();
        assert_matches!(error, Error::InvalidArgument(..));
    }
}
