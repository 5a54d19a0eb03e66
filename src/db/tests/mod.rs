use crate::models::{
    Cpe, CpeMatch, CpeMatchString, CpeReference, CpeTitle, Cve, CveDescription, CveReference,
    nvd_timestamp,
};
use chrono::NaiveDateTime;
use uuid::Uuid;

mod migrations;

fn ts(value: &str) -> NaiveDateTime {
    nvd_timestamp::parse(value).unwrap()
}

fn sample_cve(id: &str, last_modified: &str) -> Cve {
    Cve {
        id: id.to_string(),
        source_identifier: "cve@mitre.org".to_string(),
        published: ts("2024-01-01T00:00:00.000"),
        last_modified: ts(last_modified),
        vuln_status: "Analyzed".to_string(),
        descriptions: vec![
            CveDescription {
                lang: "en".to_string(),
                value: format!("{} description", id),
            },
            CveDescription {
                lang: "es".to_string(),
                value: format!("{} descripción", id),
            },
        ],
        references: vec![CveReference {
            url: format!("https://example.com/{}", id),
            source: Some("cve@mitre.org".to_string()),
            tags: vec!["Vendor Advisory".to_string(), "Patch".to_string()],
        }],
    }
}

fn sample_cpe(n: u128, last_modified: &str) -> Cpe {
    Cpe {
        cpe_name: format!("cpe:2.3:a:acme:product{}:1.0:*:*:*:*:*:*:*", n),
        cpe_name_id: Uuid::from_u128(n),
        deprecated: false,
        created: ts("2020-05-01T10:00:00.000"),
        last_modified: ts(last_modified),
        titles: vec![CpeTitle {
            title: format!("ACME Product {}", n),
            lang: "en".to_string(),
        }],
        refs: vec![
            CpeReference {
                url: "https://acme.example/".to_string(),
                ref_type: Some("Vendor".to_string()),
            },
            CpeReference {
                url: "https://acme.example/changelog".to_string(),
                ref_type: None,
            },
        ],
    }
}

fn sample_match_string(n: u128, matches: usize) -> CpeMatchString {
    CpeMatchString {
        match_criteria_id: Uuid::from_u128(n),
        criteria: format!("cpe:2.3:a:acme:product{}:*:*:*:*:*:*:*:*", n),
        status: "Active".to_string(),
        cpe_last_modified: Some(ts("2023-06-01T00:00:00.000")),
        created: ts("2023-01-01T00:00:00.000"),
        last_modified: ts("2023-06-01T00:00:00.000"),
        version_start_including: Some("1.0".to_string()),
        version_start_excluding: None,
        version_end_including: None,
        version_end_excluding: Some("2.0".to_string()),
        matches: (0..matches)
            .map(|i| CpeMatch {
                cpe_name: format!("cpe:2.3:a:acme:product{}:1.{}:*:*:*:*:*:*:*", n, i),
                cpe_name_id: Uuid::from_u128(1_000_000 + n * 1000 + i as u128),
            })
            .collect(),
    }
}
