use crate::{
    auth::{AccessDecision, AuthorizationGate},
    config::SortOrder,
    error::RegistryError,
    models::{Identity, Package, PackageView, WebRequestContext},
    web_utils::{format_author, generate_gravatar_url, local_tarball_uri, sort_by_name},
};
use tracing::{debug, error, instrument};

/// Turns the raw local package list into the authorization-filtered,
/// name-ordered view the web UI renders.
///
/// Packages are processed sequentially in input order: the capability check
/// may carry side effects (audit logging, rate limiting) that must not be
/// fanned out without an explicit contract from the provider. A provider
/// malfunction voids the whole listing; a denial only drops its item.
#[derive(Clone)]
pub struct ListingPipeline {
    gate: AuthorizationGate,
    sort_order: SortOrder,
    gravatar: bool,
    url_prefix: String,
}

impl ListingPipeline {
    pub fn new(
        gate: AuthorizationGate,
        sort_order: SortOrder,
        gravatar: bool,
        url_prefix: impl Into<String>,
    ) -> Self {
        Self {
            gate,
            sort_order,
            gravatar,
            url_prefix: url_prefix.into(),
        }
    }

    #[instrument(
        skip(self, packages, identity, request),
        fields(total = packages.len(), authenticated = !identity.is_anonymous())
    )]
    pub async fn list(
        &self,
        packages: Vec<Package>,
        identity: &Identity,
        request: &WebRequestContext,
    ) -> Result<Vec<PackageView>, RegistryError> {
        let mut permitted = Vec::new();

        for package in packages {
            // Normalization is unconditional; only inclusion depends on the
            // access decision.
            let author = format_author(package.author.as_ref());

            let decision = match self.gate.is_allowed(&package.name, identity).await {
                Ok(decision) => decision,
                Err(err) => {
                    error!(
                        package = package.name.as_str(),
                        error = %err,
                        "permission check failed; aborting listing"
                    );
                    return Err(err);
                }
            };
            if decision == AccessDecision::Denied {
                continue;
            }

            let mut view = PackageView {
                name: package.name,
                author,
                dist: package.dist,
                extra: package.extra,
            };
            view.author.avatar = Some(generate_gravatar_url(&view.author.email, self.gravatar));

            if let Some(dist) = view.dist.as_mut()
                && let Some(tarball) = dist.tarball.take()
            {
                dist.tarball = Some(local_tarball_uri(
                    &tarball,
                    &view.name,
                    request,
                    &self.url_prefix,
                ));
            }

            permitted.push(view);
        }

        debug!(listed = permitted.len(), "listing assembled");
        Ok(sort_by_name(permitted, self.sort_order))
    }
}

#[cfg(test)]
mod tests {
    use super::ListingPipeline;
    use crate::{
        auth::{AccessProvider, AuthorizationGate, CheckReply},
        config::SortOrder,
        constants::GENERIC_AVATAR,
        error::RegistryError,
        models::{Dist, Identity, Package, WebRequestContext},
    };
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use serde_json::{Map, json};
    use std::{
        collections::HashMap,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
    };

    #[derive(Clone, Copy)]
    enum Scripted {
        Allow,
        Deny,
        BackendError,
        Malfunction,
    }

    struct ScriptedProvider {
        replies: HashMap<String, Scripted>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(replies: &[(&str, Scripted)]) -> Self {
            Self {
                replies: replies
                    .iter()
                    .map(|(name, reply)| (name.to_string(), *reply))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AccessProvider for ScriptedProvider {
        async fn allow_access(
            &self,
            package_name: &str,
            _identity: &Identity,
        ) -> Result<CheckReply, RegistryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.get(package_name).copied() {
                Some(Scripted::Allow) | None => Ok(CheckReply::Decision(true)),
                Some(Scripted::Deny) => Ok(CheckReply::Decision(false)),
                Some(Scripted::BackendError) => {
                    Ok(CheckReply::BackendError("backend hiccup".to_string()))
                }
                Some(Scripted::Malfunction) => Err(RegistryError::http(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "provider exploded",
                )),
            }
        }
    }

    fn pipeline_with(
        provider: Arc<ScriptedProvider>,
        sort_order: SortOrder,
        gravatar: bool,
    ) -> ListingPipeline {
        ListingPipeline::new(AuthorizationGate::new(provider), sort_order, gravatar, "/")
    }

    fn package(name: &str) -> Package {
        Package {
            name: name.to_string(),
            author: None,
            dist: None,
            extra: Map::new(),
        }
    }

    fn package_with_tarball(name: &str, tarball: &str) -> Package {
        Package {
            name: name.to_string(),
            author: Some(json!({ "name": "Ada", "email": "foo@bar.com" })),
            dist: Some(Dist {
                tarball: Some(tarball.to_string()),
                extra: Map::new(),
            }),
            extra: Map::new(),
        }
    }

    fn request() -> WebRequestContext {
        WebRequestContext {
            protocol: "http".to_string(),
            host: "localhost:4873".to_string(),
        }
    }

    #[tokio::test]
    async fn lists_allowed_packages_sorted_ascending() {
        let provider = Arc::new(ScriptedProvider::new(&[]));
        let pipeline = pipeline_with(provider, SortOrder::Ascending, true);

        let views = pipeline
            .list(
                vec![package("zeta"), package("alpha"), package("mu")],
                &Identity::anonymous(),
                &request(),
            )
            .await
            .expect("listing");
        let names: Vec<_> = views.iter().map(|view| view.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mu", "zeta"]);
    }

    #[tokio::test]
    async fn lists_descending_when_configured() {
        let provider = Arc::new(ScriptedProvider::new(&[]));
        let pipeline = pipeline_with(provider, SortOrder::Descending, true);

        let views = pipeline
            .list(
                vec![package("zeta"), package("alpha"), package("mu")],
                &Identity::anonymous(),
                &request(),
            )
            .await
            .expect("listing");
        let names: Vec<_> = views.iter().map(|view| view.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "mu", "alpha"]);
    }

    #[tokio::test]
    async fn denied_packages_are_silently_excluded() {
        let provider = Arc::new(ScriptedProvider::new(&[("secret", Scripted::Deny)]));
        let pipeline = pipeline_with(provider.clone(), SortOrder::Ascending, true);

        let views = pipeline
            .list(
                vec![package("public"), package("secret"), package("other")],
                &Identity::anonymous(),
                &request(),
            )
            .await
            .expect("listing");
        let names: Vec<_> = views.iter().map(|view| view.name.as_str()).collect();
        assert_eq!(names, vec!["other", "public"]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn backend_error_drops_item_and_continues() {
        let provider = Arc::new(ScriptedProvider::new(&[("flaky", Scripted::BackendError)]));
        let pipeline = pipeline_with(provider.clone(), SortOrder::Ascending, true);

        let views = pipeline
            .list(
                vec![package("flaky"), package("steady")],
                &Identity::anonymous(),
                &request(),
            )
            .await
            .expect("listing");
        let names: Vec<_> = views.iter().map(|view| view.name.as_str()).collect();
        assert_eq!(names, vec!["steady"]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn provider_malfunction_fails_the_whole_listing() {
        let provider = Arc::new(ScriptedProvider::new(&[("broken", Scripted::Malfunction)]));
        let pipeline = pipeline_with(provider.clone(), SortOrder::Ascending, true);

        let err = pipeline
            .list(
                vec![package("fine"), package("broken"), package("never-checked")],
                &Identity::anonymous(),
                &request(),
            )
            .await
            .expect_err("malfunction must abort");
        assert!(matches!(err, RegistryError::Http { .. }));
        // the loop stops at the malfunctioning item
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_input_makes_no_access_checks() {
        let provider = Arc::new(ScriptedProvider::new(&[]));
        let pipeline = pipeline_with(provider.clone(), SortOrder::Ascending, true);

        let views = pipeline
            .list(Vec::new(), &Identity::anonymous(), &request())
            .await
            .expect("listing");
        assert!(views.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rewrites_tarball_and_attaches_avatar() {
        let provider = Arc::new(ScriptedProvider::new(&[]));
        let pipeline = pipeline_with(provider, SortOrder::Ascending, true);

        let views = pipeline
            .list(
                vec![package_with_tarball(
                    "foo",
                    "https://registry.example/foo/-/foo-1.0.0.tgz",
                )],
                &Identity::anonymous(),
                &request(),
            )
            .await
            .expect("listing");
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].name, "foo");
        assert_eq!(
            views[0].dist.as_ref().and_then(|dist| dist.tarball.as_deref()),
            Some("http://localhost:4873/foo/-/foo-1.0.0.tgz")
        );
        assert_eq!(
            views[0].author.avatar.as_deref(),
            Some("https://www.gravatar.com/avatar/f3ada405ce890b6f8204094deb12d8a8")
        );
    }

    #[tokio::test]
    async fn gravatar_disabled_uses_generic_avatar() {
        let provider = Arc::new(ScriptedProvider::new(&[]));
        let pipeline = pipeline_with(provider, SortOrder::Ascending, false);

        let views = pipeline
            .list(
                vec![package_with_tarball(
                    "foo",
                    "https://registry.example/foo/-/foo-1.0.0.tgz",
                )],
                &Identity::anonymous(),
                &request(),
            )
            .await
            .expect("listing");
        assert_eq!(views[0].author.avatar.as_deref(), Some(GENERIC_AVATAR));
    }

    #[tokio::test]
    async fn missing_dist_passes_through_untouched() {
        let provider = Arc::new(ScriptedProvider::new(&[]));
        let pipeline = pipeline_with(provider, SortOrder::Ascending, true);

        let mut no_tarball = package("bare");
        no_tarball.dist = Some(Dist {
            tarball: None,
            extra: Map::new(),
        });

        let views = pipeline
            .list(
                vec![package("no-dist"), no_tarball],
                &Identity::anonymous(),
                &request(),
            )
            .await
            .expect("listing");
        assert_eq!(views[0].dist.as_ref().map(|dist| dist.tarball.is_none()), Some(true));
        assert!(views[1].dist.is_none());
    }

    #[tokio::test]
    async fn author_is_normalized_for_every_listed_package() {
        let provider = Arc::new(ScriptedProvider::new(&[]));
        let pipeline = pipeline_with(provider, SortOrder::Ascending, true);

        let mut string_author = package("stringy");
        string_author.author = Some(json!("Grace Hopper"));

        let views = pipeline
            .list(
                vec![string_author, package("anonymous-author")],
                &Identity::anonymous(),
                &request(),
            )
            .await
            .expect("listing");
        // sorted: anonymous-author first
        assert_eq!(views[0].name, "anonymous-author");
        assert_eq!(views[0].author.name, "Unknown");
        assert_eq!(views[1].author.name, "Grace Hopper");
    }
}
