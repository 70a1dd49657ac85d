//! Custódia durável de um único `TokenRecord`.
//!
//! - [`FileTokenStore`]: arquivo JSON gravado com troca atômica (temp + rename)
//! - [`MemoryTokenStore`]: armazenamento em memória, para embutir e para testes
//!
//! Nenhuma implementação faz cache: a decisão cache-vs-disco é do gerenciador.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use crate::auth::token::TokenRecord;
use crate::error::{AuthError, AuthResult};

#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Backend de persistência do token
pub trait TokenStore: Send + Sync {
    /// `Ok(None)` quando ainda não existe token (estado normal antes da primeira autorização)
    fn load(&self) -> AuthResult<Option<TokenRecord>>;

    /// Grava o registro inteiro; um leitor vê o registro anterior ou o novo, nunca um parcial
    fn save(&self, record: &TokenRecord) -> AuthResult<()>;

    /// Remove o registro persistido; ausência não é erro
    fn clear(&self) -> AuthResult<()>;

    /// Descrição do local de armazenamento, para status e logs
    fn location(&self) -> String;
}

/// Token em arquivo JSON local
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Arquivo temporário no mesmo diretório, para que o rename seja atômico
    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "token".to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()))
    }

    fn ensure_parent_dir(&self) -> AuthResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    AuthError::persistence(format!(
                        "falha ao criar diretório '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        Ok(())
    }

    fn write_temp(&self, temp_path: &Path, content: &[u8]) -> std::io::Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(FILE_MODE);
        }

        let mut file = options.open(temp_path)?;
        file.write_all(content)?;
        file.sync_all()
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> AuthResult<Option<TokenRecord>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AuthError::persistence(format!(
                    "falha ao ler '{}': {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        let record: TokenRecord = serde_json::from_str(&content).map_err(|e| {
            AuthError::persistence(format!(
                "cache de token corrompido em '{}': {}",
                self.path.display(),
                e
            ))
        })?;

        record.validate().map_err(|e| {
            AuthError::persistence(format!(
                "registro inválido em '{}': {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(Some(record))
    }

    fn save(&self, record: &TokenRecord) -> AuthResult<()> {
        self.ensure_parent_dir()?;

        let content = serde_json::to_vec_pretty(record)
            .map_err(|e| AuthError::persistence(format!("falha ao serializar token: {}", e)))?;

        let temp_path = self.temp_path();
        if let Err(e) = self.write_temp(&temp_path, &content) {
            let _ = fs::remove_file(&temp_path);
            return Err(AuthError::persistence(format!(
                "falha ao gravar '{}': {}",
                temp_path.display(),
                e
            )));
        }

        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(AuthError::persistence(format!(
                "falha ao substituir '{}': {}",
                self.path.display(),
                e
            )));
        }

        log::debug!("💾 [TokenStore] Token gravado em {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> AuthResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::info!("🗑️ [TokenStore] Cache de token removido: {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::persistence(format!(
                "falha ao remover '{}': {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Token mantido apenas em memória
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    record: RwLock<Option<TokenRecord>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: TokenRecord) -> Self {
        Self {
            record: RwLock::new(Some(record)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> AuthResult<Option<TokenRecord>> {
        self.record
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| AuthError::persistence("lock do armazenamento em memória envenenado"))
    }

    fn save(&self, record: &TokenRecord) -> AuthResult<()> {
        let mut guard = self
            .record
            .write()
            .map_err(|_| AuthError::persistence("lock do armazenamento em memória envenenado"))?;
        *guard = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> AuthResult<()> {
        let mut guard = self
            .record
            .write()
            .map_err(|_| AuthError::persistence("lock do armazenamento em memória envenenado"))?;
        *guard = None;
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample_record() -> TokenRecord {
        TokenRecord::from_provider_response(
            json!({
                "access_token": "EAAG-sample",
                "token_type": "bearer",
                "expires_in": 5184000,
                "refresh_token": "rt-sample",
                "granted_scopes": ["whatsapp_business_messaging"],
                "nested": {"a": 1}
            }),
            Utc::now(),
            3600,
        )
        .unwrap()
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_load_empty_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(&path, "  \n").unwrap();
        let store = FileTokenStore::new(&path);
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested/dir/token.json"));
        let record = sample_record();

        store.save(&record).unwrap();
        let loaded = store.load().unwrap().expect("registro salvo");

        assert_eq!(loaded, record);
        assert_eq!(loaded.raw.get("nested"), Some(&json!({"a": 1})));
    }

    #[test]
    fn test_save_overwrites_in_place_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let store = FileTokenStore::new(&path);

        store.save(&sample_record()).unwrap();
        let second = TokenRecord::new("EAAG-second", "bearer", Utc::now(), 60).unwrap();
        store.save(&second).unwrap();

        assert_eq!(store.load().unwrap(), Some(second));
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "arquivo temporário não deve sobrar");
    }

    #[test]
    fn test_corrupt_file_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(&path, "{\"accessToken\": ").unwrap();

        let store = FileTokenStore::new(&path);
        assert!(matches!(store.load(), Err(AuthError::PersistenceError(_))));
    }

    #[test]
    fn test_invalid_record_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let now = Utc::now();
        fs::write(
            &path,
            json!({
                "accessToken": "",
                "tokenType": "bearer",
                "obtainedAt": now,
                "expiresAt": now,
                "raw": {}
            })
            .to_string(),
        )
        .unwrap();

        let store = FileTokenStore::new(&path);
        assert!(matches!(store.load(), Err(AuthError::PersistenceError(_))));
    }

    #[test]
    fn test_save_into_unwritable_location_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();

        let store = FileTokenStore::new(blocker.join("token.json"));
        let result = store.save(&sample_record());
        assert!(matches!(result, Err(AuthError::PersistenceError(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        let store = FileTokenStore::new(&path);
        store.save(&sample_record()).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("token.json"));
        store.save(&sample_record()).unwrap();

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        // segunda remoção não falha
        store.clear().unwrap();
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.load().unwrap(), None);

        let record = sample_record();
        store.save(&record).unwrap();
        assert_eq!(store.load().unwrap(), Some(record));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        assert_eq!(store.location(), "memory");
    }
}
