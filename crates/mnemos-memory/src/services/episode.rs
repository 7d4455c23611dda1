//! Episode service.

use std::sync::Arc;

use mnemos_types::Episode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Deleted, IdRequest, Lookup, ServiceResult, parse, to_value, unknown_method};
use crate::episode_store::{EpisodePatch, EpisodeQuery, EpisodeStats, EpisodeStore, NewEpisode, QueryResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEpisodeResponse {
    pub episode_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    pub source_id: String,
    pub target_id: String,
    pub link_type: String,
}

/// `linked` is `false` when the link already existed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkResponse {
    pub found: bool,
    pub linked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub id: String,
    pub patch: EpisodePatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResponse {
    pub saved: bool,
}

/// Episode create / query / link / get / delete / update / save / stats.
pub struct EpisodeService {
    store: Arc<EpisodeStore>,
}

impl EpisodeService {
    pub fn new(store: Arc<EpisodeStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<EpisodeStore> {
        &self.store
    }

    pub fn create(&self, request: NewEpisode) -> ServiceResult<CreateEpisodeResponse> {
        let episode_id = self.store.create(request)?;
        Ok(CreateEpisodeResponse { episode_id })
    }

    pub fn query(&self, query: &EpisodeQuery) -> ServiceResult<QueryResult> {
        Ok(self.store.query(query)?)
    }

    pub fn link(&self, request: &LinkRequest) -> ServiceResult<LinkResponse> {
        match self
            .store
            .link(&request.source_id, &request.target_id, &request.link_type)
        {
            Ok(linked) => Ok(LinkResponse { found: true, linked }),
            Err(e) if e.is_not_found() => Ok(LinkResponse {
                found: false,
                linked: false,
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get(&self, id: &str) -> ServiceResult<Lookup<Episode>> {
        Lookup::from_result(self.store.get(id))
    }

    pub fn delete(&self, id: &str) -> ServiceResult<Deleted> {
        Ok(Deleted {
            deleted: self.store.delete(id)?,
        })
    }

    pub fn update(&self, request: UpdateRequest) -> ServiceResult<Lookup<Episode>> {
        Lookup::from_result(self.store.update(&request.id, request.patch).map(Some))
    }

    pub fn save(&self) -> ServiceResult<SaveResponse> {
        self.store.save()?;
        Ok(SaveResponse {
            saved: self.store.config().data_dir.is_some(),
        })
    }

    pub fn stats(&self) -> ServiceResult<EpisodeStats> {
        Ok(self.store.stats()?)
    }

    pub(crate) fn dispatch(&self, op: &str, params: Value) -> ServiceResult<Value> {
        match op {
            "create" => to_value(self.create(parse(params)?)?),
            "query" => to_value(self.query(&parse(params)?)?),
            "link" => to_value(self.link(&parse(params)?)?),
            "get" => to_value(self.get(&parse::<IdRequest>(params)?.id)?),
            "delete" => to_value(self.delete(&parse::<IdRequest>(params)?.id)?),
            "update" => to_value(self.update(parse(params)?)?),
            "save" => to_value(self.save()?),
            "stats" => to_value(self.stats()?),
            _ => Err(unknown_method(&format!("episode.{op}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use mnemos_types::MnemosError;
    use serde_json::json;

    fn service() -> EpisodeService {
        EpisodeService::new(Arc::new(EpisodeStore::open(MemoryConfig::in_memory(2)).unwrap()))
    }

    #[test]
    fn get_missing_is_found_false() {
        let s = service();
        assert!(!s.get("ghost").unwrap().found);
        assert!(!s.update(UpdateRequest {
            id: "ghost".into(),
            patch: EpisodePatch::default(),
        })
        .unwrap()
        .found);
    }

    #[test]
    fn link_reports_missing_endpoints() {
        let s = service();
        let a = s.create(NewEpisode::new("t", vec![1.0, 0.0])).unwrap().episode_id;
        let r = s
            .link(&LinkRequest {
                source_id: a.clone(),
                target_id: "ghost".into(),
                link_type: "related".into(),
            })
            .unwrap();
        assert_eq!(r, LinkResponse { found: false, linked: false });
    }

    #[test]
    fn validation_errors_surface() {
        let s = service();
        let err = s.create(NewEpisode::new("t", vec![1.0])).unwrap_err();
        assert!(matches!(err, MnemosError::Validation(_)));
    }

    #[test]
    fn dispatch_update_and_delete() {
        let s = service();
        let id = s.create(NewEpisode::new("t", vec![0.0, 1.0]).starting_at(5)).unwrap().episode_id;
        let updated = s
            .dispatch("update", json!({"id": id, "patch": {"endTime": 9}}))
            .unwrap();
        assert_eq!(updated["endTime"], 9);
        assert_eq!(s.dispatch("delete", json!({"id": id})).unwrap(), json!({"deleted": true}));
        assert_eq!(s.dispatch("save", Value::Null).unwrap(), json!({"saved": false}));
    }
}
