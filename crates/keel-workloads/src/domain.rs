//! Domain freshness markers.
//!
//! A fresh domain token declares that the external source of desired state
//! has a complete, current view of that domain. Convergence refuses
//! destructive desired-driven actions for domains whose token is absent.

use std::collections::HashSet;

use keel_core::StoreNode;
use keel_core::schema;
use keel_models::ModelError;

use crate::bbs::Bbs;
use crate::error::Result;

impl Bbs {
    /// Declare `domain` fresh for `ttl_seconds` (0 = until explicitly
    /// removed).
    pub async fn upsert_domain(&self, domain: &str, ttl_seconds: u64) -> Result<()> {
        if domain.is_empty() {
            return Err(ModelError::invalid_field("domain").into());
        }

        self.store
            .set_multi(vec![StoreNode::with_ttl(schema::domain_path(domain), "", ttl_seconds)])
            .await?;
        Ok(())
    }

    /// All currently fresh domains.
    pub async fn domains(&self) -> Result<Vec<String>> {
        let nodes = self.store.list_recursively(schema::DOMAIN_ROOT).await?;
        Ok(nodes.iter().map(|node| schema::base_name(&node.key).to_string()).collect())
    }

    /// The fresh-domain set pinned for one convergence pass.
    pub(crate) async fn freshness_snapshot(&self) -> Result<HashSet<String>> {
        Ok(self.domains().await?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use keel_models::ModelError;

    use super::*;
    use crate::test_support::TestBbs;

    #[tokio::test]
    async fn upsert_and_list_domains() {
        let harness = TestBbs::new();
        harness.bbs.upsert_domain("cf-apps", 30).await.unwrap();
        harness.bbs.upsert_domain("cf-tasks", 0).await.unwrap();

        let mut domains = harness.bbs.domains().await.unwrap();
        domains.sort();
        assert_eq!(domains, vec!["cf-apps".to_string(), "cf-tasks".to_string()]);
    }

    #[tokio::test]
    async fn empty_domain_is_rejected() {
        let harness = TestBbs::new();
        let err = harness.bbs.upsert_domain("", 30).await.unwrap_err();
        assert_eq!(err.as_model(), Some(&ModelError::invalid_field("domain")));
    }

    #[tokio::test]
    async fn freshness_expires_with_the_ttl() {
        let harness = TestBbs::new();
        harness.bbs.upsert_domain("cf-apps", 30).await.unwrap();
        assert_eq!(harness.bbs.domains().await.unwrap().len(), 1);

        harness.clock.advance(Duration::from_secs(31));
        assert!(harness.bbs.domains().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zero_ttl_never_expires() {
        let harness = TestBbs::new();
        harness.bbs.upsert_domain("cf-apps", 0).await.unwrap();

        harness.clock.advance(Duration::from_secs(3600));
        assert_eq!(harness.bbs.domains().await.unwrap(), vec!["cf-apps".to_string()]);
    }
}
