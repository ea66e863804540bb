//! The registry's entity catalog.
//!
//! Tables keep their legacy column names; every entity exposes English
//! public names. Text columns are fixed-width in the source database and
//! are trimmed on read.

use serde_json::Value;

use crate::descriptor::{EntityDescriptor, FieldDef, FieldType, PopulateRule};
use crate::error::Result;
use crate::query::{Condition, Op};
use crate::search::{MatchKind, SearchParam, SearchSpec};
use crate::service::Registry;

pub const EXPORT_COUNTRY: &str = "Lietuva";

fn not_deleted() -> Condition {
    Condition::new("isDeleted", Op::Is(false))
}

fn text(name: &str, column: &str) -> FieldDef {
    FieldDef::string(name).column(column).trim()
}

fn now() -> Value {
    Value::from(chrono::Utc::now().to_rfc3339())
}

/// Creation timestamp, stamped on insert when absent.
fn created(column: &str) -> FieldDef {
    FieldDef::date("createDate").column(column).default_fn(now)
}

pub fn certificates() -> EntityDescriptor {
    EntityDescriptor::new("certificates", "sertifikatai")
        .field(FieldDef::number("id"))
        .field(text("certificateNumber", "certNr"))
        .field(
            FieldDef::number("exporter")
                .column("certExport")
                .populate(PopulateRule::resolve("activityLocations")),
        )
        .field(
            FieldDef::string("importCountry")
                .column("certImpSalis")
                .populate(PopulateRule::resolve("countries")),
        )
        .field(text("status", "certStatus"))
        .field(created("certDateCreated"))
        .field(FieldDef::date("issueDate").column("certDateIsdavimo"))
        .field(FieldDef::date("departureDate").column("certDateIsvykimo"))
        .field(text("details", "certDetales"))
        .field(
            FieldDef::number("risk")
                .column("certRizika")
                .populate(PopulateRule::resolve("risks")),
        )
        .field(
            FieldDef::number("post")
                .column("certPostas")
                .populate(PopulateRule::resolve("posts")),
        )
        .field(text("issuedBy", "certIsdave"))
        .field(text("issuedByName", "certIsdaveName"))
        .field(text("issuedByDepartment", "certIsdaveDep"))
        .field(text("createdUser", "certCreatedUser"))
        .field(text("createdUserName", "certCreatedUserName"))
        .field(text("modifyUser", "certModifUser"))
        .field(text("modifyUserName", "certModifUserName"))
        .field(text("modifyDepartment", "certModifDep"))
        .field(FieldDef::date("modifyDate").column("certDateModif"))
        .field(FieldDef::boolean("isChanged").column("certPakeistas"))
        .field(text("blankNumber", "certBlankas"))
        .field(FieldDef::number("riskScore").column("certRizikosBalas"))
        .field(FieldDef::boolean("riskChange").column("certRizikosKeitimas"))
        .field(text("riskReason", "certRizikosPriezastis"))
        .field(FieldDef::boolean("isChecked").column("certTikrinimas"))
        .field(
            FieldDef::boolean("isDeleted")
                .column("certDelete")
                .default_value(Value::Bool(false)),
        )
        .field(FieldDef::string("exportCountry").computed(|_| Value::from(EXPORT_COUNTRY)))
        .field(
            FieldDef::new("loads", FieldType::Array)
                .reverse(PopulateRule::by_property("loads", "certificate").populate(&["type"])),
        )
        .field(
            FieldDef::new("products", FieldType::Array).reverse(
                PopulateRule::by_property("products", "certificate")
                    .populate(&["manufacturer", "country"]),
            ),
        )
        .scope(not_deleted())
        .search(certificate_search())
}

pub fn certificate_search() -> SearchSpec {
    SearchSpec::new(
        SearchParam::new("certificateNumber", "certificateNumber", MatchKind::Contains).min_len(3),
    )
    .filter(SearchParam::new("blankNumber", "blankNumber", MatchKind::Contains))
    .filter(SearchParam::new("year", "issueDate", MatchKind::Year))
    .populate(&["exporter", "importCountry", "post", "risk", "loads", "products"])
    .messages(
        "Certificate not found.",
        "More than 1 certificate with same params.",
    )
}

pub fn loads() -> EntityDescriptor {
    EntityDescriptor::new("loads", "kroviniai")
        .field(FieldDef::number("id"))
        .field(
            FieldDef::number("certificate")
                .column("krovCertId")
                .populate(PopulateRule::resolve("certificates")),
        )
        .field(
            FieldDef::number("type")
                .column("krovTipas")
                .populate(PopulateRule::resolve("lookups")),
        )
        .field(text("typeOther", "krovTipasKita"))
        .field(text("number", "krovNr"))
        .field(text("seal", "krovPlomba"))
        .field(text("details", "krovDetales"))
        .field(created("krovDateCreated"))
        .field(FieldDef::date("modifyDate").column("krovDateModif"))
        .field(text("modifyUser", "krovModifUser"))
        .field(text("modifyUserName", "krovModifUserName"))
        .field(
            FieldDef::boolean("isDeleted")
                .column("krovModifDelete")
                .default_value(Value::Bool(false)),
        )
        .scope(not_deleted())
}

pub fn products() -> EntityDescriptor {
    let mut products = EntityDescriptor::new("products", "produktai")
        .field(FieldDef::number("id"))
        .field(
            FieldDef::number("certificate")
                .column("prodCertId")
                .populate(PopulateRule::resolve("certificates")),
        )
        .field(
            FieldDef::number("load")
                .column("prodKrovId")
                .populate(PopulateRule::resolve("loads")),
        )
        .field(
            FieldDef::number("manufacturer")
                .column("prodGamintojas")
                .populate(PopulateRule::resolve("activityLocations")),
        )
        .field(
            FieldDef::string("country")
                .column("prodSalis")
                .populate(PopulateRule::resolve("countries")),
        )
        .field(text("unit", "prodVnt"))
        .field(FieldDef::number("amount").column("prodKiekis"))
        .field(text("details", "prodDetales"))
        .field(text("originCertificate", "prodKilmesSert"))
        .field(FieldDef::number("risk").column("prodRizika"));

    for level in 1..=4 {
        let code = format!("prodL{level}");
        let name = format!("prodL{level}Name");
        products = products.field(text(&code, &code)).field(text(&name, &name));
    }

    products
        .field(created("prodDateCreated"))
        .field(FieldDef::date("modifyDate").column("prodDateModif"))
        .field(text("modifyUser", "prodModifUser"))
        .field(text("modifyUserName", "prodModifUserName"))
        .field(text("name", "prodPavadinimas"))
        .field(
            FieldDef::boolean("isDeleted")
                .column("prodModifDelete")
                .default_value(Value::Bool(false)),
        )
        .field(FieldDef::number("lastLayer").column("prodLastLayer"))
        .scope(not_deleted())
}

pub fn activity_locations() -> EntityDescriptor {
    EntityDescriptor::new("activityLocations", "veiklavietes")
        .field(FieldDef::number("id"))
        .field(text("internalId", "vklVid"))
        .field(FieldDef::number("companyCode").column("vklJar"))
        .field(text("type", "vklTipas"))
        .field(text("name", "vklPavad"))
        .field(FieldDef::boolean("isExport").column("vklExport"))
        .field(FieldDef::boolean("isManufacturer").column("vklGamint"))
        .field(
            FieldDef::string("country")
                .column("vklSalis")
                .populate(PopulateRule::resolve("countries")),
        )
        .field(text("address", "vklAdresas"))
        .field(text("registrationNumber", "vklRegNr"))
        .field(text("confirmationNumber", "vklPatvirtNr"))
        .field(text("swift", "vklSwift"))
        .field(text("details", "vklDetales"))
        .field(FieldDef::boolean("isActive").column("vklAktyvus"))
        .field(text("search", "vklSearch"))
        .field(created("vklDateCreated"))
        .field(FieldDef::date("modifyDate").column("vklDateModif"))
        .field(text("modifyUser", "vklModifUser"))
        .field(text("modifyUserName", "vklModifUserName"))
        .field(text("groupCode", "vklBandosKodas"))
}

pub fn countries() -> EntityDescriptor {
    EntityDescriptor::new("countries", "salys")
        .field(FieldDef::string("id"))
        .field(text("name", "salPavad"))
        .field(text("iso", "salIso2"))
}

pub fn posts() -> EntityDescriptor {
    EntityDescriptor::new("posts", "postai")
        .field(FieldDef::number("id"))
        .field(text("name", "postPavad"))
        .field(text("code", "postKodas"))
        .field(text("abbreviation", "postTrump"))
        .field(
            FieldDef::string("country")
                .column("postSalis")
                .populate(PopulateRule::resolve("countries")),
        )
        .field(text("address", "postAdresas"))
        .field(FieldDef::boolean("active").column("postAktyvus"))
}

pub fn risks() -> EntityDescriptor {
    EntityDescriptor::new("risks", "rizikos")
        .field(FieldDef::number("id").column("rizId"))
        .field(text("name", "rizName"))
        .field(FieldDef::number("min").column("rizMin"))
        .field(FieldDef::string("max").column("rizMax"))
        .field(FieldDef::string("check").column("rizCheck"))
}

pub fn lookups() -> EntityDescriptor {
    EntityDescriptor::new("lookups", "lookup")
        .field(FieldDef::number("id"))
        .field(text("group", "lkpGroup"))
        .field(FieldDef::number("number").column("lkpNum"))
        .field(text("title", "lkpTitle"))
        .field(text("description", "lkpDescr"))
}

pub fn catalog() -> Vec<EntityDescriptor> {
    vec![
        countries(),
        lookups(),
        risks(),
        posts(),
        activity_locations(),
        certificates(),
        loads(),
        products(),
    ]
}

/// Register every catalog entity, or only those named in `only`.
pub fn register_catalog(mut registry: Registry, only: Option<&[String]>) -> Result<Registry> {
    for descriptor in catalog() {
        if only.is_some_and(|names| !names.iter().any(|n| *n == descriptor.name)) {
            continue;
        }
        registry = registry.register(descriptor)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::memory::MemoryStore;
    use crate::seed::{load_fixtures, SEED_ORDER};
    use serde_json::json;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Arc;

    fn fixtures_dir() -> &'static Path {
        Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../../../fixtures"))
    }

    async fn seeded() -> Registry {
        let registry = register_catalog(Registry::new(Arc::new(MemoryStore::new())), None).unwrap();
        load_fixtures(&registry, fixtures_dir()).await.unwrap();
        registry
    }

    fn criteria(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn catalog_is_valid_and_matches_seed_order() {
        let names: Vec<String> = catalog().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, SEED_ORDER.map(String::from).to_vec());
        for descriptor in catalog() {
            descriptor.validate().unwrap();
        }
        assert_eq!(risks().pk_column(), "rizId");
    }

    #[test]
    fn partial_registration() {
        let only = vec!["countries".to_string(), "posts".to_string()];
        let registry =
            register_catalog(Registry::new(Arc::new(MemoryStore::new())), Some(only.as_slice())).unwrap();
        assert_eq!(registry.entity_names(), vec!["countries", "posts"]);
    }

    #[tokio::test]
    async fn substring_shared_by_two_certificates_is_ambiguous() {
        let registry = seeded().await;
        let err = registry
            .entity("certificates")
            .unwrap()
            .search(&criteria(&[("certificateNumber", "123")]))
            .await
            .unwrap_err();
        assert!(
            matches!(err, RegistryError::Ambiguous(m) if m == "More than 1 certificate with same params.")
        );
    }

    #[tokio::test]
    async fn narrowed_search_returns_one_populated_certificate() {
        let registry = seeded().await;
        let cert = registry
            .entity("certificates")
            .unwrap()
            .search(&criteria(&[("certificateNumber", "A123")]))
            .await
            .unwrap();

        assert_eq!(cert["certificateNumber"], json!("A123456"));
        assert_eq!(cert["exportCountry"], json!("Lietuva"));
        assert_eq!(cert["exporter"]["name"], json!("UAB Pieno Eksportas"));
        assert_eq!(cert["importCountry"]["name"], json!("Baltarusija"));
        assert_eq!(cert["post"]["name"], json!("Kybartai"));
        assert_eq!(cert["risk"]["name"], json!("Žema"));

        let loads = cert["loads"].as_array().unwrap();
        assert_eq!(loads.len(), 2, "deleted loads stay hidden");
        assert_eq!(loads[0]["type"]["title"], json!("Sunkvežimis"));

        let products = cert["products"].as_array().unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0]["manufacturer"]["name"], json!("AB Grūdų Gamyba"));
        assert_eq!(products[0]["country"]["name"], json!("Lietuva"));
        assert_eq!(products[0]["unit"], json!("kg"));
    }

    #[tokio::test]
    async fn year_narrows_and_misses_are_not_found() {
        let registry = seeded().await;
        let certificates = registry.entity("certificates").unwrap();

        let cert = certificates
            .search(&criteria(&[("certificateNumber", "123"), ("year", "2023")]))
            .await
            .unwrap();
        assert_eq!(cert["certificateNumber"], json!("B123000"));

        let err = certificates
            .search(&criteria(&[("certificateNumber", "ZZZ")]))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(m) if m == "Certificate not found."));

        let err = certificates
            .search(&criteria(&[("certificateNumber", "A1")]))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
    }

    #[tokio::test]
    async fn deleted_certificates_are_out_of_scope() {
        let registry = seeded().await;
        let certificates = registry.entity("certificates").unwrap();

        let cert = certificates
            .search(&criteria(&[("certificateNumber", "999")]))
            .await
            .unwrap();
        assert_eq!(cert["certificateNumber"], json!("C999999"));
        assert_eq!(cert["loads"], json!([]));
        assert!(cert.get("risk").map_or(true, Value::is_null));

        assert_eq!(certificates.count(&[], None).await.unwrap(), 3);
        assert_eq!(certificates.count(&[], Some(false)).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn seeding_stamps_creation_dates() {
        let registry = seeded().await;
        let load = registry
            .entity("loads")
            .unwrap()
            .get(json!(1), None, &[])
            .await
            .unwrap();
        let stamped = load["createDate"].as_str().unwrap();
        assert!(crate::query::year_of(stamped).is_some());
    }

    #[tokio::test]
    async fn entities_without_search_reject_it() {
        let registry = seeded().await;
        let err = registry
            .entity("countries")
            .unwrap()
            .search(&criteria(&[("name", "Lie")]))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
    }
}
