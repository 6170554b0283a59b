use cep_enricher::{CepConfig, EnrichmentEngine, EnrichmentPipeline, LocalStorage};
use httpmock::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const INPUT_CSV: &str = "\
crm,nome,endereco,numero,bairro,cidade,uf,cep
209301,Dra. Ana Souza,\"Rua Perrella, 331\",,Fundação,São Bernardo do Campo,SP,
118822,Dr. Bruno Lima,Av. Beira Mar,3980,Meireles,Fortaleza,CE,60165-121
77001,Dr. Caio Reis,Rua Inexistente,10,Centro,Aquiraz,CE,
55500,Dra. Duda Melo,Rua Sem Cidade,5,,,SP,
31313,Dr. Elias Paz,Rua Manual,1,Centro,Campinas,SP,
";

const OVERRIDES_CSV: &str = "record_key,cep,address,version\n31313-SP,13010-111,Rua Manual 1,2\n";

const CITIES_CSV: &str = "uf,city,cep\nCE,Aquiraz,61700-000\n";

fn write_fixture(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}

fn config_for(dir: &TempDir, server: &MockServer) -> CepConfig {
    let mut config = CepConfig::default();
    config.resolver.base_dir = dir.path().to_string_lossy().to_string();
    config.input.path = "input.csv".to_string();
    config.output.path = "output/enriched.csv".to_string();
    config.cache.path = "cache/cep_cache.json".to_string();
    config.overrides.path = Some("overrides.csv".to_string());
    config.providers.structured_registry.base_url = Some(server.url("/ws"));
    config.providers.lookup_site.base_url = Some(server.url("/app/carrega-cep-endereco.php"));
    config.providers.city_fallback.registry_lookup = false;
    config.providers.city_fallback.reference_csv = Some("cities.csv".to_string());
    config.cascade.provider_timeout_seconds = 5;
    config.cascade.retry_backoff_ms = 10;
    config.batch.workers = 2;
    config
}

async fn run_once(config: CepConfig) -> String {
    let storage = LocalStorage::new(config.resolver.base_dir.clone());
    let pipeline = EnrichmentPipeline::from_config(storage, config)
        .await
        .unwrap();
    EnrichmentEngine::new_with_monitoring(pipeline, false)
        .run()
        .await
        .unwrap()
}

fn read_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader
        .records()
        .map(|r| r.unwrap().iter().map(String::from).collect())
        .collect()
}

#[tokio::test]
async fn test_batch_enrichment_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    write_fixture(temp_dir.path(), "input.csv", INPUT_CSV);
    write_fixture(temp_dir.path(), "overrides.csv", OVERRIDES_CSV);
    write_fixture(temp_dir.path(), "cities.csv", CITIES_CSV);

    let server = MockServer::start();
    let registry_mock = server.mock(|when, then| {
        when.method(GET).path_contains("PERRELLA");
        then.status(200)
            .header("Content-Type", "application/json")
            .json_body(serde_json::json!([
                {"cep": "09781-330", "logradouro": "Rua Perrella", "uf": "SP"}
            ]));
    });

    let output = run_once(config_for(&temp_dir, &server)).await;
    assert_eq!(output, "output/enriched.csv");

    let output_path = temp_dir.path().join("output/enriched.csv");
    let mut reader = csv::Reader::from_path(&output_path).unwrap();
    let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(
        headers,
        vec![
            "crm",
            "nome",
            "endereco",
            "numero",
            "bairro",
            "cidade",
            "uf",
            "cep",
            "cep_status",
            "cep_method",
            "cep_specificity"
        ]
    );

    let rows = read_rows(&output_path);
    assert_eq!(rows.len(), 5);

    // cep, cep_status, cep_method, cep_specificity
    let tail = |row: &Vec<String>| -> Vec<String> { row[7..11].to_vec() };
    assert_eq!(
        tail(&rows[0]),
        vec!["09781-330", "RESOLVED", "StructuredRegistryProvider", "STREET_LEVEL"]
    );
    assert_eq!(tail(&rows[1]), vec!["60165-121", "PRESENT", "", ""]);
    assert_eq!(
        tail(&rows[2]),
        vec!["61700-000", "LOW_CONFIDENCE", "CityLevelFallbackProvider", "CITY_LEVEL"]
    );
    assert_eq!(tail(&rows[3]), vec!["", "INPUT_INCOMPLETE", "", ""]);
    assert_eq!(
        tail(&rows[4]),
        vec!["13010-111", "RESOLVED", "ManualOverride", "STREET_LEVEL"]
    );

    assert!(temp_dir.path().join("cache/cep_cache.json").exists());
    registry_mock.assert_hits(1);
}

#[tokio::test]
async fn test_second_run_is_served_from_persisted_cache() {
    let temp_dir = TempDir::new().unwrap();
    write_fixture(temp_dir.path(), "input.csv", INPUT_CSV);
    write_fixture(temp_dir.path(), "overrides.csv", OVERRIDES_CSV);
    write_fixture(temp_dir.path(), "cities.csv", CITIES_CSV);

    let server = MockServer::start();
    let registry_mock = server.mock(|when, then| {
        when.method(GET).path_contains("PERRELLA");
        then.status(200)
            .header("Content-Type", "application/json")
            .json_body(serde_json::json!([
                {"cep": "09781-330", "logradouro": "Rua Perrella", "uf": "SP"}
            ]));
    });

    run_once(config_for(&temp_dir, &server)).await;
    let output_path = temp_dir.path().join("output/enriched.csv");
    let first = read_rows(&output_path);
    let hits_after_first = registry_mock.hits();

    run_once(config_for(&temp_dir, &server)).await;
    let second = read_rows(&output_path);

    assert_eq!(first, second);
    assert_eq!(registry_mock.hits(), hits_after_first);
}
