use serial_test::serial;
use std::env;
use std::fs;
use study_companion::config::{AppConfig, EmbeddingProvider, IndexProvider, LogFormat};
use study_companion::dispatch::PersonaPreset;

const BIN: &str = "study-companion";

// Helper to clear environment variables that might interfere with tests
fn clear_env_vars() {
    unsafe {
        for var in [
            "SC_SERVER__PORT",
            "SC_ASSISTANT__TOP_K",
            "SC_INDEX__PROVIDER",
            "SC_LLM__ACCOUNT_ID",
            "SC_EMBEDDING__ACCOUNT_ID",
            "CONFIG_FILE",
            "PORT",
            "RATE_LIMIT_ENABLED",
            "TIMEOUT_DISABLED",
            "LLM_BASE_URL",
            "LLM_MODEL",
            "LLM_API_KEY",
            "CLOUDFLARE_ACCOUNT_ID",
            "CLOUDFLARE_API_TOKEN",
        ] {
            env::remove_var(var);
        }
    }
}

// The Workers AI defaults need an account id for the llm and embedding endpoints
fn set_account_env() {
    unsafe {
        env::set_var("SC_LLM__ACCOUNT_ID", "acct");
        env::set_var("SC_EMBEDDING__ACCOUNT_ID", "acct");
    }
}

#[test]
#[serial]
fn test_default_config() {
    clear_env_vars();
    assert!(
        AppConfig::load_from_args([BIN]).is_err(),
        "defaults need an account id"
    );

    set_account_env();
    let config = AppConfig::load_from_args([BIN]).expect("defaults should load");
    assert_eq!(config.server.port, 3000);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.assistant.top_k, 3);
    assert_eq!(config.assistant.learn_command, "/learn");
    assert_eq!(config.index.provider, IndexProvider::Memory);
    assert_eq!(config.log.format, LogFormat::Compact);
    assert!(config.resilience.rate_limit_enabled);
    assert_eq!(config.embedding.provider, EmbeddingProvider::WorkersAi);
    assert_eq!(config.embedding.model, "@cf/baai/bge-m3");
    assert_eq!(config.llm.model, "@cf/meta/llama-3.3-70b-instruct-fp8-fast");
    assert_eq!(
        config.llm.base_url().as_deref(),
        Some("https://api.cloudflare.com/client/v4/accounts/acct/ai")
    );

    clear_env_vars();
}

#[test]
#[serial]
fn test_env_override() {
    clear_env_vars();
    set_account_env();
    unsafe {
        env::set_var("SC_SERVER__PORT", "9090");
        env::set_var("SC_ASSISTANT__TOP_K", "5");
    }

    let config = AppConfig::load_from_args([BIN]).expect("Failed to load config");
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.assistant.top_k, 5);

    clear_env_vars();
}

#[test]
#[serial]
fn test_cli_beats_env() {
    clear_env_vars();
    set_account_env();
    unsafe {
        env::set_var("SC_SERVER__PORT", "9090");
    }

    let config = AppConfig::load_from_args([BIN, "--port", "7171", "--rate-limit-enabled", "false"])
        .expect("Failed to load config");
    assert_eq!(config.server.port, 7171);
    assert!(!config.resilience.rate_limit_enabled);

    clear_env_vars();
}

#[test]
#[serial]
fn test_file_load() {
    clear_env_vars();

    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("companion.yaml");
    fs::write(
        &file_path,
        r#"
server:
  port: 7070
llm:
  base_url: http://localhost:8080
embedding:
  provider: workers-ai
  account_id: acct-123
  model: "@cf/baai/bge-m3"
index:
  provider: vectorize
  account_id: acct-123
  index_name: interview-notes
assistant:
  preset: memory
log:
  format: json
"#,
    )
    .expect("Failed to write temp config");

    let config = AppConfig::load_from_args([BIN, "--config", file_path.to_str().unwrap()])
        .expect("Failed to load config from file");
    assert_eq!(config.server.port, 7070);
    assert_eq!(config.llm.base_url().as_deref(), Some("http://localhost:8080"));
    assert_eq!(config.embedding.provider, EmbeddingProvider::WorkersAi);
    assert_eq!(config.embedding.model, "@cf/baai/bge-m3");
    assert_eq!(config.index.provider, IndexProvider::Vectorize);
    assert_eq!(config.index.index_name, "interview-notes");
    assert_eq!(config.assistant.preset, PersonaPreset::Memory);
    assert_eq!(config.log.format, LogFormat::Json);
}

#[test]
#[serial]
fn test_cloudflare_credentials_from_env() {
    clear_env_vars();
    unsafe {
        env::set_var("SC_INDEX__PROVIDER", "vectorize");
        env::set_var("CLOUDFLARE_ACCOUNT_ID", "acct-env");
        env::set_var("CLOUDFLARE_API_TOKEN", "token-env");
    }

    let config = AppConfig::load_from_args([BIN]).expect("Failed to load config");
    assert_eq!(config.index.account_id.as_deref(), Some("acct-env"));
    assert_eq!(config.index.api_key.as_deref(), Some("token-env"));
    assert_eq!(config.embedding.account_id.as_deref(), Some("acct-env"));
    assert_eq!(config.llm.api_key.as_deref(), Some("token-env"));
    assert_eq!(
        config.llm.base_url().as_deref(),
        Some("https://api.cloudflare.com/client/v4/accounts/acct-env/ai")
    );

    // A dedicated llm key wins over the shared Cloudflare token.
    unsafe {
        env::set_var("LLM_API_KEY", "llm-key");
    }
    let config = AppConfig::load_from_args([BIN]).expect("Failed to load config");
    assert_eq!(config.llm.api_key.as_deref(), Some("llm-key"));
    assert_eq!(config.embedding.api_key.as_deref(), Some("token-env"));

    clear_env_vars();
}

#[test]
#[serial]
fn test_invalid_config_is_rejected() {
    clear_env_vars();
    set_account_env();
    unsafe {
        env::set_var("SC_ASSISTANT__TOP_K", "0");
    }
    assert!(AppConfig::load_from_args([BIN]).is_err());

    clear_env_vars();
    set_account_env();
    unsafe {
        env::set_var("SC_INDEX__PROVIDER", "vectorize");
    }
    assert!(AppConfig::load_from_args([BIN]).is_err());

    clear_env_vars();
}

#[test]
#[serial]
fn test_cwd_config_fallback() {
    clear_env_vars();
    set_account_env();

    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("config.yaml"), "server:\n  port: 6060\n")
        .expect("Failed to write ./config.yaml");

    let previous = env::current_dir().unwrap();
    env::set_current_dir(dir.path()).unwrap();
    let result = AppConfig::load_from_args([BIN]);
    env::set_current_dir(previous).unwrap();

    assert_eq!(result.expect("Failed to load config").server.port, 6060);

    clear_env_vars();
}
