use std::collections::HashSet;

use super::normalize::normalize_header;

/// Header row after provisioning, and which titles had to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPlan {
    pub headers: Vec<String>,
    pub added: Vec<String>,
}

impl ColumnPlan {
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty()
    }
}

/// Appends every required title whose normalized form is not already
/// present. Existing titles are never renamed or reordered.
pub fn plan_columns(existing: &[String], required: &[String]) -> ColumnPlan {
    let mut seen: HashSet<String> = existing
        .iter()
        .map(|title| normalize_header(title))
        .filter(|key| !key.is_empty())
        .collect();
    let mut headers = existing.to_vec();
    let mut added = Vec::new();
    for title in required {
        let key = normalize_header(title);
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        headers.push(title.clone());
        added.push(title.clone());
    }
    ColumnPlan { headers, added }
}

/// Zero-based position of `title` in `headers`, compared by normalized form.
pub fn column_index(headers: &[String], title: &str) -> Option<usize> {
    let key = normalize_header(title);
    if key.is_empty() {
        return None;
    }
    headers
        .iter()
        .position(|header| normalize_header(header) == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn appends_only_missing_columns_in_order() {
        let plan = plan_columns(
            &titles(&["Nombre", "Asesora"]),
            &titles(&["Nombre", "Nivel de Interés", "Asesora", "Sync ID"]),
        );
        assert_eq!(plan.added, titles(&["Nivel de Interés", "Sync ID"]));
        assert_eq!(
            plan.headers,
            titles(&["Nombre", "Asesora", "Nivel de Interés", "Sync ID"])
        );
    }

    #[test]
    fn equivalent_spelling_does_not_duplicate_a_column() {
        let first = plan_columns(&titles(&["Nombre"]), &titles(&["Nivel de Interés"]));
        assert_eq!(first.added, titles(&["Nivel de Interés"]));

        let second = plan_columns(&first.headers, &titles(&["NIVEL DE INTERES "]));
        assert!(second.is_unchanged());
        assert_eq!(second.headers, first.headers);
    }

    #[test]
    fn duplicates_within_required_are_added_once() {
        let plan = plan_columns(&[], &titles(&["Validación", "validacion"]));
        assert_eq!(plan.added, titles(&["Validación"]));
    }

    #[test]
    fn index_lookup_is_normalized() {
        let headers = titles(&["Nombre", "Fecha Próx. Contacto", "", "ID Cliente"]);
        assert_eq!(column_index(&headers, "fecha prox contacto"), Some(1));
        assert_eq!(column_index(&headers, "ID CLIENTE"), Some(3));
        assert_eq!(column_index(&headers, "Sync ID"), None);
        assert_eq!(column_index(&headers, ""), None);
    }
}
