use parcel_core::{Address, CoreError, CoreResult, CountryCode, Package, PostalKey, ServiceWindow, Shipment};

pub const REFERENCE_MAX_LEN: usize = 100;

/// Checks an assembled shipment before numbers are spent on its packages.
///
/// Implementations collect every violation and report them together in a
/// single [`CoreError::ValidationError`].
pub trait ShipmentValidator: Send + Sync {
    fn validate(&self, shipment: &Shipment) -> CoreResult<()>;
}

/// Field-level rules for addresses, service windows, values and package
/// dimensions. Cancelled packages are not re-checked.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralValidator;

impl ShipmentValidator for StructuralValidator {
    fn validate(&self, shipment: &Shipment) -> CoreResult<()> {
        let mut violations = Vec::new();

        if shipment.tracking_number <= 0 {
            violations.push("tracking number is not assigned".to_string());
        }
        check_address("sender", &shipment.sender, &mut violations);
        check_address("recipient", &shipment.recipient, &mut violations);
        check_window("pickup", &shipment.pickup, &mut violations);
        check_window("delivery", &shipment.delivery, &mut violations);
        if shipment.delivery.date < shipment.pickup.date {
            violations.push("delivery date is before pickup date".to_string());
        }
        if shipment.order_type.trim().is_empty() {
            violations.push("order type is empty".to_string());
        }
        check_amount("goods value", shipment.goods_value, &mut violations);
        check_amount("insurance value", shipment.insurance_value, &mut violations);
        if let Some(reference) = &shipment.customer_reference {
            if reference.chars().count() > REFERENCE_MAX_LEN {
                violations.push(format!("customer reference exceeds {} characters", REFERENCE_MAX_LEN));
            }
        }

        for (index, package) in shipment.packages.iter().enumerate() {
            if !package.is_cancelled() {
                check_package(index, package, &mut violations);
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            tracing::debug!(
                tracking_number = shipment.tracking_number,
                count = violations.len(),
                "Shipment rejected"
            );
            Err(CoreError::ValidationError(violations.join("; ")))
        }
    }
}

fn check_address(role: &str, address: &Address, violations: &mut Vec<String>) {
    for (field, value) in [
        ("name1", &address.name1),
        ("street", &address.street),
        ("city", &address.city),
    ] {
        if value.trim().is_empty() {
            violations.push(format!("{} {} is empty", role, field));
        }
    }

    if let Err(e) = CountryCode::parse(&address.country) {
        violations.push(format!("{}: {}", role, message(e)));
    }
    if let Err(e) = PostalKey::parse(&address.postal_code) {
        violations.push(format!("{}: {}", role, message(e)));
    }
    if !is_plausible_email(address.email.expose()) {
        // The address itself is PII and stays out of the message
        violations.push(format!("{} email is invalid", role));
    }
    if address.phone.expose().trim().is_empty() {
        violations.push(format!("{} phone is empty", role));
    }
}

fn check_window(role: &str, window: &ServiceWindow, violations: &mut Vec<String>) {
    if window.time_from > window.time_to {
        violations.push(format!(
            "{} window starts after it ends ({} > {})",
            role, window.time_from, window.time_to
        ));
    }
    check_amount(&format!("{} extra fee", role), window.extra_fee, violations);
}

fn check_amount(what: &str, value: f64, violations: &mut Vec<String>) {
    if !value.is_finite() || value < 0.0 {
        violations.push(format!("{} must be a non-negative number", what));
    }
}

fn check_package(index: usize, package: &Package, violations: &mut Vec<String>) {
    for (field, value) in [
        ("length", package.length_cm),
        ("width", package.width_cm),
        ("height", package.height_cm),
    ] {
        if value <= 0 {
            violations.push(format!("package {} {} must be positive", index + 1, field));
        }
    }
    check_amount(&format!("package {} weight", index + 1), package.weight_kg, violations);
    if let Some(reference) = &package.reference {
        if reference.chars().count() > REFERENCE_MAX_LEN {
            violations.push(format!(
                "package {} reference exceeds {} characters",
                index + 1,
                REFERENCE_MAX_LEN
            ));
        }
    }
}

fn is_plausible_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn message(err: CoreError) -> String {
    match err {
        CoreError::ValidationError(msg) => msg,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PackageDraft, ShipmentDraft};
    use chrono::{NaiveDate, NaiveTime};
    use parcel_core::PackagingType;

    fn address(code: &str) -> Address {
        Address {
            name1: "Muster GmbH".to_string(),
            name2: None,
            street: "Hauptstr. 1".to_string(),
            postal_code: code.to_string(),
            city: "Berlin".to_string(),
            country: "DE".to_string(),
            email: "info@muster.de".into(),
            phone: "+49301234".into(),
        }
    }

    fn window(day: u32, from: u32, to: u32) -> ServiceWindow {
        ServiceWindow {
            date: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
            time_from: NaiveTime::from_hms_opt(from, 0, 0).unwrap(),
            time_to: NaiveTime::from_hms_opt(to, 0, 0).unwrap(),
            note: None,
            extra_fee: 0.0,
        }
    }

    fn shipment() -> Shipment {
        ShipmentDraft {
            sender: address("10115"),
            recipient: address("80331"),
            pickup: window(2, 8, 16),
            delivery: window(3, 8, 16),
            customer_reference: Some("PO-4711".to_string()),
            order_type: None,
            goods_value: 120.0,
            insurance_value: 0.0,
            packages: vec![PackageDraft {
                reference: None,
                packaging_type: PackagingType::Parcel,
                length_cm: 40,
                width_cm: 30,
                height_cm: 20,
                weight_kg: 5.0,
            }],
        }
        .into_shipment(49100000001)
    }

    #[test]
    fn test_valid_shipment_passes() {
        assert!(StructuralValidator.validate(&shipment()).is_ok());
    }

    #[test]
    fn test_violations_are_collected() {
        let mut s = shipment();
        s.sender.city = " ".to_string();
        s.recipient.postal_code = "80-".to_string() + &"9".repeat(12);
        s.packages[0].height_cm = 0;

        let err = StructuralValidator.validate(&s).unwrap_err();
        match err {
            CoreError::ValidationError(msg) => {
                assert_eq!(msg.split("; ").count(), 3, "{}", msg);
                assert!(msg.contains("sender city is empty"));
                assert!(msg.contains("package 1 height must be positive"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_window_order() {
        let mut s = shipment();
        s.pickup = window(2, 17, 9);
        s.delivery = window(1, 8, 16);

        let err = StructuralValidator.validate(&s).unwrap_err().to_string();
        assert!(err.contains("pickup window starts after it ends"));
        assert!(err.contains("delivery date is before pickup date"));
    }

    #[test]
    fn test_email_rules_do_not_leak_value() {
        let mut s = shipment();
        s.recipient.email = "secret-person.example.com".into();

        let err = StructuralValidator.validate(&s).unwrap_err().to_string();
        assert!(err.contains("recipient email is invalid"));
        assert!(!err.contains("secret-person"));

        assert!(is_plausible_email("a@b.de"));
        assert!(!is_plausible_email("a@b"));
        assert!(!is_plausible_email("@b.de"));
        assert!(!is_plausible_email("a@@b.de"));
    }

    #[test]
    fn test_cancelled_packages_are_skipped() {
        let mut s = shipment();
        s.packages[0].width_cm = -1;
        assert!(StructuralValidator.validate(&s).is_err());

        s.packages[0].cancel();
        assert!(StructuralValidator.validate(&s).is_ok());
    }

    #[test]
    fn test_negative_amounts_rejected() {
        let mut s = shipment();
        s.goods_value = -1.0;
        s.insurance_value = f64::NAN;

        let err = StructuralValidator.validate(&s).unwrap_err().to_string();
        assert!(err.contains("goods value"));
        assert!(err.contains("insurance value"));
    }
}
