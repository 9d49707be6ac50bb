use time::{Date, Month, OffsetDateTime};
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

use crate::store::Freshness;

/// Length of the digit string a contact channel is reduced to.
pub const CHANNEL_DIGITS: usize = 10;

/// Folds a column or field name to its comparison key: lowercase, accents
/// removed, only letters and digits kept. "Nivel de Interés" and
/// " nivel  de interes" both become `niveldeinteres`.
pub fn normalize_header(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Reduces a phone/WhatsApp value to its last ten digits. Returns `None`
/// when fewer than ten digits are present.
pub fn normalize_channel(value: &str) -> Option<String> {
    let digits: Vec<char> = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < CHANNEL_DIGITS {
        return None;
    }
    Some(digits[digits.len() - CHANNEL_DIGITS..].iter().collect())
}

/// Parses `dd/mm/yyyy` (also with `-` or `.`), two-digit years as 20xx, and
/// ISO `yyyy-mm-dd`.
pub fn parse_date(value: &str) -> Option<Date> {
    let value = value.trim();
    let parts: Vec<&str> = value.split(['/', '-', '.']).map(str::trim).collect();
    let [a, b, c] = parts.as_slice() else {
        return None;
    };
    let (year, month, day) = if a.len() == 4 {
        (*a, *b, *c)
    } else {
        (*c, *b, *a)
    };
    let mut year: i32 = year.parse().ok()?;
    if (0..100).contains(&year) {
        year += 2000;
    }
    let month = Month::try_from(month.parse::<u8>().ok()?).ok()?;
    let day: u8 = day.parse().ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

/// `Overdue` iff the next-contact date is strictly before `today`. Missing or
/// unparseable dates count as current.
pub fn freshness(next_contact: Option<&str>, today: Date) -> Freshness {
    match next_contact.and_then(parse_date) {
        Some(date) if date < today => Freshness::Overdue,
        _ => Freshness::Current,
    }
}

pub fn today_utc() -> Date {
    OffsetDateTime::now_utc().date()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: Month, day: u8) -> Date {
        Date::from_calendar_date(year, month, day).unwrap()
    }

    #[test]
    fn header_normalization_ignores_case_accents_and_spacing() {
        assert_eq!(normalize_header("Nivel de Interés"), "niveldeinteres");
        assert_eq!(normalize_header("  NIVEL DE INTERES "), "niveldeinteres");
        assert_eq!(normalize_header("Canal (Tel/WhatsApp)"), "canaltelwhatsapp");
        assert_eq!(normalize_header("Fecha Próx. Contacto"), "fechaproxcontacto");
        assert_eq!(normalize_header("Validación"), "validacion");
    }

    #[test]
    fn channel_keeps_last_ten_digits() {
        assert_eq!(normalize_channel("55 1234 5678").as_deref(), Some("5512345678"));
        assert_eq!(
            normalize_channel("+52 1 (55) 1234-5678").as_deref(),
            Some("5512345678")
        );
        assert_eq!(normalize_channel("1234-5678"), None);
        assert_eq!(normalize_channel(""), None);
    }

    #[test]
    fn parses_day_first_and_iso_dates() {
        assert_eq!(parse_date("05/03/2025"), Some(date(2025, Month::March, 5)));
        assert_eq!(parse_date("5-3-25"), Some(date(2025, Month::March, 5)));
        assert_eq!(parse_date("2025-03-05"), Some(date(2025, Month::March, 5)));
        assert_eq!(parse_date("31/02/2025"), None);
        assert_eq!(parse_date("mañana"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn overdue_only_strictly_before_today() {
        let today = date(2025, Month::March, 10);
        assert_eq!(freshness(Some("09/03/2025"), today), Freshness::Overdue);
        assert_eq!(freshness(Some("10/03/2025"), today), Freshness::Current);
        assert_eq!(freshness(Some("11/03/2025"), today), Freshness::Current);
        assert_eq!(freshness(Some("pronto"), today), Freshness::Current);
        assert_eq!(freshness(None, today), Freshness::Current);
    }
}
