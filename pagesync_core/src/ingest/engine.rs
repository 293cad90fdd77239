use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use futures_util::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use super::report::{Branch, BranchFailure, RunReport};
use crate::config::{InsightsWindow, LoadToggles};
use crate::graph::{GraphClient, InsightQuery};
use crate::metrics::{MetricDescriptor, PAGE_METRICS, POST_METRICS};
use crate::models::{
    InsightSeries, Page, PageInsight, PagePost, PagePostAttachment, PostInsight, PostKey,
};
use crate::notify::{Notification, NotificationKind, Notifier, notify_best_effort};
use crate::store::{Reconciled, RecordStore, Store};
use crate::{Error, Result};

/// Walks account -> page -> {page, posts, insights} -> {attachments, post
/// insights} for a set of access tokens and reconciles everything it pulls.
///
/// Every node of the tree is its own task. A failing node is logged, reported
/// to the notifier and recorded in the [`RunReport`]; its siblings and parent
/// carry on.
#[derive(Clone)]
pub struct IngestEngine {
    client: GraphClient,
    backend: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    load: LoadToggles,
    insights_for: InsightsWindow,
}

impl IngestEngine {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(
        client: GraphClient,
        backend: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            client,
            backend,
            notifier,
            load: LoadToggles::default(),
            insights_for: InsightsWindow::Day,
        }
    }

    pub fn with_load(mut self, load: LoadToggles) -> Self {
        self.load = load;
        self
    }

    pub fn with_insights_for(mut self, window: InsightsWindow) -> Self {
        self.insights_for = window;
        self
    }

    /// One ingestion pass over every token. Branch failures never abort it.
    #[tracing::instrument(level = "info", skip_all, fields(tokens = tokens.len()))]
    pub async fn run(&self, tokens: &[String]) -> RunReport {
        let run = Run {
            client: self.client.clone(),
            pages: Store::new(self.backend.clone(), Page::TABLE),
            posts: Store::new(self.backend.clone(), PagePost::TABLE),
            attachments: Store::new(self.backend.clone(), PagePostAttachment::TABLE),
            backend: self.backend.clone(),
            notifier: self.notifier.clone(),
            load: self.load,
            since: (Utc::now() - self.insights_for.lookback()).date_naive(),
            report: Arc::new(Mutex::new(RunReport::default())),
        };

        let mut accounts = JoinSet::new();
        for (account, token) in tokens.iter().enumerate() {
            run.spawn(
                &mut accounts,
                Branch::Account { account },
                run.clone().load_account(token.clone()),
            );
        }
        join_children(accounts).await;

        let report = run.report.lock().await.clone();
        tracing::info!(
            created = report.created.values().sum::<u64>(),
            updated = report.updated.values().sum::<u64>(),
            failures = report.failures.len(),
            "ingestion run finished"
        );
        report
    }
}

/// Shared state of one run, cloned into every branch task.
#[derive(Clone)]
struct Run {
    client: GraphClient,
    pages: Store<Page>,
    posts: Store<PagePost>,
    attachments: Store<PagePostAttachment>,
    backend: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    load: LoadToggles,
    since: NaiveDate,
    report: Arc<Mutex<RunReport>>,
}

impl Run {
    /// Spawn `task` as `branch` on `children`, containing its failure.
    fn spawn<F>(&self, children: &mut JoinSet<()>, branch: Branch, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let run = self.clone();
        children.spawn(async move {
            let error = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(err)) => err.to_string(),
                Err(_) => "branch task panicked".to_string(),
            };
            run.fail(branch, error).await;
        });
    }

    async fn fail(&self, branch: Branch, error: String) {
        tracing::error!(%branch, %error, "branch failed");
        notify_best_effort(
            self.notifier.as_ref(),
            Notification::new(NotificationKind::BranchFailed, format!("{branch}: {error}")),
        )
        .await;
        self.report
            .lock()
            .await
            .failures
            .push(BranchFailure { branch, error });
    }

    async fn record(&self, table: &'static str, key: &str, outcome: Reconciled) {
        match outcome {
            Reconciled::Created => tracing::info!(table, key, "created"),
            Reconciled::Updated => tracing::info!(table, key, "updated"),
        }
        self.report.lock().await.record(table, outcome);
    }

    async fn load_account(self, token: String) -> Result<()> {
        let mut children = JoinSet::new();
        let listed = self.list_accounts(&token, &mut children).await;
        join_children(children).await;
        listed
    }

    async fn list_accounts(&self, token: &str, children: &mut JoinSet<()>) -> Result<()> {
        let accounts = self.client.accounts(token);
        futures_util::pin_mut!(accounts);
        while let Some(account) = accounts.next().await {
            let account = account?;
            let page_id = required_id(&account, "account")?;
            // Page endpoints take the page token the account listing hands out.
            let page_token = account
                .get("access_token")
                .and_then(Value::as_str)
                .unwrap_or(token)
                .to_string();
            tracing::info!(account_id = %page_id, "downloaded account");
            tracing::debug!(payload = %account, "account payload");

            if self.load.pages {
                self.spawn(
                    children,
                    Branch::Page {
                        page_id: page_id.clone(),
                    },
                    self.clone().load_page(page_id.clone(), page_token.clone()),
                );
            }
            if self.load.page_posts {
                self.spawn(
                    children,
                    Branch::PagePosts {
                        page_id: page_id.clone(),
                    },
                    self.clone()
                        .load_page_posts(page_id.clone(), page_token.clone()),
                );
            }
            if self.load.page_insights {
                for descriptor in PAGE_METRICS.iter() {
                    self.spawn(
                        children,
                        Branch::PageInsights {
                            page_id: page_id.clone(),
                            metric: descriptor.metric,
                        },
                        self.clone().load_page_insights(
                            descriptor,
                            page_id.clone(),
                            page_token.clone(),
                        ),
                    );
                }
            }
        }
        Ok(())
    }

    async fn load_page(self, page_id: String, token: String) -> Result<()> {
        let data = self.client.page(&page_id, &token).await?;
        tracing::info!(%page_id, "downloaded page");
        tracing::debug!(payload = %data, "page payload");

        let page = Page::from_payload(&data)?;
        let key = page.id.clone();
        let outcome = self.pages.reconcile(page).await?;
        self.record(Page::TABLE, &key, outcome).await;
        Ok(())
    }

    async fn load_page_posts(self, page_id: String, token: String) -> Result<()> {
        let mut children = JoinSet::new();
        let listed = self.list_posts(&page_id, &token, &mut children).await;
        join_children(children).await;
        listed
    }

    async fn list_posts(
        &self,
        page_id: &str,
        token: &str,
        children: &mut JoinSet<()>,
    ) -> Result<()> {
        let posts = self.client.published_posts(page_id, token);
        futures_util::pin_mut!(posts);
        while let Some(post) = posts.next().await {
            let post = post?;
            let key = PostKey::parse(&required_id(&post, "post")?)?;
            tracing::info!(page_post_id = %key.compound(), "downloaded page post");
            tracing::debug!(payload = %post, "page post payload");

            self.spawn(
                children,
                Branch::Post {
                    page_id: key.page_id.clone(),
                    post_id: key.post_id.clone(),
                },
                self.clone().reconcile_post(post),
            );
            if self.load.page_post_attachments {
                self.spawn(
                    children,
                    Branch::PostAttachments {
                        page_id: key.page_id.clone(),
                        post_id: key.post_id.clone(),
                    },
                    self.clone()
                        .load_post_attachments(key.clone(), token.to_string()),
                );
            }
            if self.load.page_post_insights {
                for descriptor in POST_METRICS.iter() {
                    self.spawn(
                        children,
                        Branch::PostInsights {
                            page_id: key.page_id.clone(),
                            post_id: key.post_id.clone(),
                            metric: descriptor.metric,
                        },
                        self.clone().load_post_insights(
                            descriptor,
                            key.clone(),
                            token.to_string(),
                        ),
                    );
                }
            }
        }
        Ok(())
    }

    async fn reconcile_post(self, data: Value) -> Result<()> {
        let post = PagePost::from_payload(&data)?;
        let key = post.id.clone();
        let outcome = self.posts.reconcile(post).await?;
        self.record(PagePost::TABLE, &key, outcome).await;
        Ok(())
    }

    async fn load_post_attachments(self, key: PostKey, token: String) -> Result<()> {
        let mut children = JoinSet::new();
        let listed = self.list_attachments(&key, &token, &mut children).await;
        join_children(children).await;
        listed
    }

    async fn list_attachments(
        &self,
        key: &PostKey,
        token: &str,
        children: &mut JoinSet<()>,
    ) -> Result<()> {
        let attachments = self
            .client
            .post_attachments(&key.page_id, &key.post_id, token);
        futures_util::pin_mut!(attachments);
        let mut index = 0;
        while let Some(item) = attachments.next().await {
            let item = item?;
            tracing::info!(page_id = %key.page_id, post_id = %key.post_id, "downloaded page post attachment");
            tracing::debug!(payload = %item, "page post attachment payload");

            self.spawn(
                children,
                Branch::Attachment {
                    page_id: key.page_id.clone(),
                    post_id: key.post_id.clone(),
                    index,
                },
                self.clone().reconcile_attachment(key.clone(), item),
            );
            index += 1;
        }
        Ok(())
    }

    async fn reconcile_attachment(self, key: PostKey, data: Value) -> Result<()> {
        let attachment = PagePostAttachment::from_payload(key.clone(), &data)?;
        let outcome = self.attachments.reconcile(attachment).await?;
        self.record(PagePostAttachment::TABLE, &key.compound(), outcome)
            .await;
        Ok(())
    }

    async fn load_post_insights(
        self,
        descriptor: &'static MetricDescriptor,
        key: PostKey,
        token: String,
    ) -> Result<()> {
        let mut children = JoinSet::new();
        let listed = self
            .list_post_insights(descriptor, &key, &token, &mut children)
            .await;
        join_children(children).await;
        listed
    }

    async fn list_post_insights(
        &self,
        descriptor: &'static MetricDescriptor,
        key: &PostKey,
        token: &str,
        children: &mut JoinSet<()>,
    ) -> Result<()> {
        let query = self.insight_query(descriptor);
        let series = self.client.insights(&key.compound(), token, &query);
        futures_util::pin_mut!(series);
        let mut index = 0;
        while let Some(item) = series.next().await {
            let item = item?;
            tracing::info!(
                page_id = %key.page_id,
                post_id = %key.post_id,
                metric = descriptor.metric,
                "downloaded page post insight"
            );
            tracing::debug!(payload = %item, "page post insight payload");

            self.spawn(
                children,
                Branch::PostInsight {
                    page_id: key.page_id.clone(),
                    post_id: key.post_id.clone(),
                    metric: descriptor.metric,
                    index,
                },
                self.clone()
                    .reconcile_post_insight(descriptor, key.clone(), item),
            );
            index += 1;
        }
        Ok(())
    }

    async fn reconcile_post_insight(
        self,
        descriptor: &'static MetricDescriptor,
        key: PostKey,
        data: Value,
    ) -> Result<()> {
        let store: Store<PostInsight> = Store::new(self.backend.clone(), descriptor.table);
        for point in InsightSeries::from_payload(descriptor, &data)?.post_points(&key) {
            let outcome = store.reconcile(point).await?;
            self.record(descriptor.table, &key.compound(), outcome).await;
        }
        Ok(())
    }

    async fn load_page_insights(
        self,
        descriptor: &'static MetricDescriptor,
        page_id: String,
        token: String,
    ) -> Result<()> {
        let mut children = JoinSet::new();
        let listed = self
            .list_page_insights(descriptor, &page_id, &token, &mut children)
            .await;
        join_children(children).await;
        listed
    }

    async fn list_page_insights(
        &self,
        descriptor: &'static MetricDescriptor,
        page_id: &str,
        token: &str,
        children: &mut JoinSet<()>,
    ) -> Result<()> {
        let query = self.insight_query(descriptor);
        let series = self.client.insights(page_id, token, &query);
        futures_util::pin_mut!(series);
        let mut index = 0;
        while let Some(item) = series.next().await {
            let item = item?;
            tracing::info!(%page_id, metric = descriptor.metric, "downloaded page insight");
            tracing::debug!(payload = %item, "page insight payload");

            self.spawn(
                children,
                Branch::PageInsight {
                    page_id: page_id.to_string(),
                    metric: descriptor.metric,
                    index,
                },
                self.clone()
                    .reconcile_page_insight(descriptor, page_id.to_string(), item),
            );
            index += 1;
        }
        Ok(())
    }

    async fn reconcile_page_insight(
        self,
        descriptor: &'static MetricDescriptor,
        page_id: String,
        data: Value,
    ) -> Result<()> {
        let store: Store<PageInsight> = Store::new(self.backend.clone(), descriptor.table);
        for point in InsightSeries::from_payload(descriptor, &data)?.page_points(&page_id)? {
            let date = point.date.clone();
            let outcome = store.reconcile(point).await?;
            self.record(descriptor.table, &format!("{page_id}@{date}"), outcome)
                .await;
        }
        Ok(())
    }

    fn insight_query(&self, descriptor: &MetricDescriptor) -> InsightQuery {
        InsightQuery {
            metric: descriptor.metric.to_string(),
            period: descriptor.period,
            since: Some(self.since),
        }
    }
}

fn required_id(payload: &Value, what: &str) -> Result<String> {
    payload
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::payload(format!("{what} without id")))
}

/// Barrier over a parent's children. Failures were already recorded by the
/// children themselves.
async fn join_children(mut children: JoinSet<()>) {
    while let Some(joined) = children.join_next().await {
        if let Err(err) = joined {
            tracing::error!(error = %err, "branch task did not complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::descriptor;
    use crate::store::MemoryRecordStore;
    use crate::test_support::{RecordingNotifier, ScriptedTransport, graph_settings};
    use serde_json::json;

    const ONLY_PAGES: LoadToggles = LoadToggles {
        pages: true,
        page_posts: false,
        page_insights: false,
        page_post_attachments: false,
        page_post_insights: false,
    };

    const ONLY_PAGE_INSIGHTS: LoadToggles = LoadToggles {
        pages: false,
        page_posts: false,
        page_insights: true,
        page_post_attachments: false,
        page_post_insights: false,
    };

    struct Harness {
        transport: Arc<ScriptedTransport>,
        backend: Arc<MemoryRecordStore>,
        notifier: Arc<RecordingNotifier>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                transport: Arc::new(ScriptedTransport::new()),
                backend: Arc::new(MemoryRecordStore::new()),
                notifier: Arc::new(RecordingNotifier::new()),
            }
        }

        fn engine(&self, load: LoadToggles) -> IngestEngine {
            let client = GraphClient::new(self.transport.clone(), &graph_settings()).unwrap();
            IngestEngine::new(client, self.backend.clone(), self.notifier.clone()).with_load(load)
        }
    }

    fn tokens() -> Vec<String> {
        vec!["user-token".to_string()]
    }

    fn script_full_tree(transport: &ScriptedTransport) {
        transport.on(
            "/v10.0/me/accounts",
            json!({"data": [{"id": "P1", "access_token": "page-token"}]}),
        );
        transport.on("/v10.0/P1", json!({"id": "P1", "name": "Acme"}));
        transport.on(
            "/v10.0/P1/published_posts",
            json!({"data": [{"id": "P1_42", "created_time": "2021-03-04T10:00:00+0000", "shares": {"count": 2}}]}),
        );
        transport.on(
            "/v10.0/P1_42/attachments",
            json!({"data": [{"type": "photo", "url": "https://cdn.test/a.jpg"}]}),
        );
        transport.on(
            "/v10.0/P1_42/insights",
            json!({"data": [{
                "name": "post_reactions_by_type_total",
                "period": "lifetime",
                "values": [{"value": {"like": 3, "anger": 1}}],
                "id": "P1_42/insights/post_reactions_by_type_total/lifetime"
            }]}),
        );
        transport.on(
            "/v10.0/P1/insights",
            json!({"data": [{
                "name": "page_video_views",
                "period": "day",
                "values": [
                    {"value": 10, "end_time": "2021-03-03T08:00:00+0000"},
                    {"value": 12, "end_time": "2021-03-04T08:00:00+0000"}
                ],
                "id": "P1/insights/page_video_views/day"
            }]}),
        );
    }

    #[tokio::test]
    async fn creates_page_from_single_account() {
        let h = Harness::new();
        h.transport.on(
            "/v10.0/me/accounts",
            json!({"data": [{"id": "P1", "access_token": "page-token"}]}),
        );
        h.transport.on("/v10.0/P1", json!({"id": "P1", "name": "Acme"}));

        let report = h.engine(ONLY_PAGES).run(&tokens()).await;
        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(report.created(Page::TABLE), 1);

        let pages: Store<Page> = Store::new(h.backend.clone(), Page::TABLE);
        let page = pages.get(&"P1".to_string()).await.unwrap().unwrap().record;
        assert_eq!(page.name, "Acme");
        assert_eq!(page.about, None);
        assert_eq!(page.whatsapp_number, None);

        let page_call = h
            .transport
            .calls()
            .into_iter()
            .find(|(path, _)| path == "/v10.0/P1")
            .unwrap();
        assert_eq!(
            page_call.1,
            vec![("access_token".to_string(), "page-token".to_string())]
        );
    }

    #[tokio::test]
    async fn walks_the_whole_tree() {
        let h = Harness::new();
        script_full_tree(&h.transport);

        let report = h.engine(LoadToggles::default()).run(&tokens()).await;
        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(report.created(Page::TABLE), 1);
        assert_eq!(report.created(PagePost::TABLE), 1);
        assert_eq!(report.created(PagePostAttachment::TABLE), 1);
        for d in POST_METRICS.iter() {
            assert_eq!(report.created(d.table), 1, "{}", d.table);
        }
        for d in PAGE_METRICS.iter() {
            assert_eq!(report.created(d.table), 2, "{}", d.table);
        }
        // One insights request per post descriptor, one per page descriptor.
        assert_eq!(h.transport.calls_to("/v10.0/P1_42/insights"), POST_METRICS.len());
        assert_eq!(h.transport.calls_to("/v10.0/P1/insights"), PAGE_METRICS.len());

        let reactions = descriptor("post_reactions_by_type_total").unwrap();
        let store: Store<PostInsight> = Store::new(h.backend.clone(), reactions.table);
        let stored = store
            .get(&("P1".to_string(), "42".to_string(), crate::metrics::Period::Lifetime))
            .await
            .unwrap()
            .unwrap()
            .record;
        assert_eq!(stored.values["likes"], Some(3.0));
        assert_eq!(stored.values["angers"], Some(1.0));
        assert_eq!(stored.values["loves"], None);

        let posts: Store<PagePost> = Store::new(h.backend.clone(), PagePost::TABLE);
        let post = posts.get(&"P1_42".to_string()).await.unwrap().unwrap().record;
        assert_eq!(post.shares_count, Some(2));
    }

    #[tokio::test]
    async fn second_run_updates_instead_of_creating() {
        let h = Harness::new();
        script_full_tree(&h.transport);
        let engine = h.engine(LoadToggles::default());

        let first = engine.run(&tokens()).await;
        let pages: Store<Page> = Store::new(h.backend.clone(), Page::TABLE);
        let before = pages.get(&"P1".to_string()).await.unwrap().unwrap();

        let second = engine.run(&tokens()).await;
        assert!(second.is_clean(), "{:?}", second.failures);
        assert!(second.created.is_empty(), "{:?}", second.created);
        assert_eq!(first.created, second.updated);

        let after = pages.get(&"P1".to_string()).await.unwrap().unwrap();
        assert_eq!(before.record, after.record);
        assert_eq!(h.backend.count(Page::TABLE).await, 1);
        assert_eq!(h.backend.count(PagePostAttachment::TABLE).await, 1);
    }

    #[tokio::test]
    async fn failing_insights_of_one_page_leave_the_sibling_alone() {
        let h = Harness::new();
        h.transport.on(
            "/v10.0/me/accounts",
            json!({"data": [{"id": "PA", "access_token": "a"}, {"id": "PB", "access_token": "b"}]}),
        );
        h.transport.fail("/v10.0/PA/insights");
        h.transport.on(
            "/v10.0/PB/insights",
            json!({"data": [{"period": "day", "values": [{"value": 5, "end_time": "2021-03-04T08:00:00+0000"}]}]}),
        );

        let report = h.engine(ONLY_PAGE_INSIGHTS).run(&tokens()).await;

        assert_eq!(report.failures.len(), PAGE_METRICS.len());
        assert!(report.failures.iter().all(|f| matches!(
            &f.branch,
            Branch::PageInsights { page_id, .. } if page_id == "PA"
        )));
        for d in PAGE_METRICS.iter() {
            assert_eq!(report.created(d.table), 1, "{}", d.table);
            let rows = h.backend.rows(d.table).await;
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].fields["page_id"], "PB");
        }
        let kinds = h.notifier.kinds().await;
        assert_eq!(kinds.len(), PAGE_METRICS.len());
        assert!(kinds.iter().all(|k| *k == NotificationKind::BranchFailed));
        let seen = h.notifier.seen().await;
        assert!(
            seen.iter().all(|n| n.message.starts_with("page_insights PA ")),
            "{seen:?}"
        );
    }

    #[tokio::test]
    async fn bad_attachment_fails_only_itself() {
        let h = Harness::new();
        h.transport
            .on("/v10.0/me/accounts", json!({"data": [{"id": "P1"}]}));
        h.transport.on(
            "/v10.0/P1/published_posts",
            json!({"data": [{"id": "P1_42", "created_time": "2021-03-04T10:00:00+0000"}]}),
        );
        h.transport.on(
            "/v10.0/P1_42/attachments",
            json!({"data": [
                {"url": "https://cdn.test/untyped.jpg"},
                {"type": "photo", "url": "https://cdn.test/a.jpg"}
            ]}),
        );
        let load = LoadToggles {
            pages: false,
            page_posts: true,
            page_insights: false,
            page_post_attachments: true,
            page_post_insights: false,
        };

        let report = h.engine(load).run(&tokens()).await;

        assert_eq!(h.backend.count(PagePostAttachment::TABLE).await, 1);
        assert_eq!(report.created(PagePostAttachment::TABLE), 1);
        assert_eq!(report.created(PagePost::TABLE), 1);
        assert_eq!(report.failures.len(), 1, "{:?}", report.failures);
        assert_eq!(
            report.failures[0].branch,
            Branch::Attachment {
                page_id: "P1".into(),
                post_id: "42".into(),
                index: 0,
            }
        );
        assert!(report.failures[0].error.contains("type"));
    }

    #[tokio::test]
    async fn bad_insight_item_leaves_the_rest_of_the_listing() {
        let h = Harness::new();
        h.transport
            .on("/v10.0/me/accounts", json!({"data": [{"id": "P1"}]}));
        h.transport.on(
            "/v10.0/P1/insights",
            json!({"data": [
                {"period": "day", "values": "not a list"},
                {"period": "day", "values": [{"value": 5, "end_time": "2021-03-04T08:00:00+0000"}]}
            ]}),
        );

        let report = h.engine(ONLY_PAGE_INSIGHTS).run(&tokens()).await;

        assert_eq!(report.failures.len(), PAGE_METRICS.len());
        assert!(report.failures.iter().all(|f| matches!(
            &f.branch,
            Branch::PageInsight { page_id, index: 0, .. } if page_id == "P1"
        )));
        for d in PAGE_METRICS.iter() {
            assert_eq!(h.backend.count(d.table).await, 1, "{}", d.table);
        }
    }

    #[tokio::test]
    async fn listing_failure_still_waits_for_spawned_children() {
        let h = Harness::new();
        h.transport.on(
            "/v10.0/me/accounts",
            json!({"data": [{"id": "P1"}], "paging": {"next": "https://graph.test/v10.0/cursor/2"}}),
        );
        h.transport.fail("/v10.0/cursor/2");
        h.transport.on("/v10.0/P1", json!({"id": "P1", "name": "Acme"}));

        let report = h.engine(ONLY_PAGES).run(&tokens()).await;

        assert_eq!(report.created(Page::TABLE), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].branch, Branch::Account { account: 0 });
        // Without a page token the user token is used.
        let page_call = h
            .transport
            .calls()
            .into_iter()
            .find(|(path, _)| path == "/v10.0/P1")
            .unwrap();
        assert_eq!(page_call.1[0].1, "user-token");
    }

    #[tokio::test]
    async fn store_validation_rejection_is_a_branch_failure() {
        let h = Harness::new();
        h.transport
            .on("/v10.0/me/accounts", json!({"data": [{"id": "P1"}, {"id": "P2"}]}));
        h.transport
            .on("/v10.0/P1", json!({"id": "P1", "name": "Acme", "checkins": -4}));
        h.transport.on("/v10.0/P2", json!({"id": "P2", "name": "Beta"}));

        let report = h.engine(ONLY_PAGES).run(&tokens()).await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures[0].branch,
            Branch::Page {
                page_id: "P1".into()
            }
        );
        assert!(report.failures[0].error.contains("check_ins"));
        assert_eq!(report.created(Page::TABLE), 1);
    }

    #[tokio::test]
    async fn missing_page_name_fails_only_that_page() {
        let h = Harness::new();
        h.transport
            .on("/v10.0/me/accounts", json!({"data": [{"id": "P1"}]}));
        h.transport.on("/v10.0/P1", json!({"id": "P1"}));

        let report = h.engine(ONLY_PAGES).run(&tokens()).await;
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].error.contains("name"));
        assert_eq!(h.backend.count(Page::TABLE).await, 0);
    }

    #[tokio::test]
    async fn insight_requests_start_at_the_lookback_window() {
        let h = Harness::new();
        h.transport
            .on("/v10.0/me/accounts", json!({"data": [{"id": "P1"}]}));
        h.transport.on("/v10.0/P1/insights", json!({"data": []}));

        let engine = h
            .engine(ONLY_PAGE_INSIGHTS)
            .with_insights_for(InsightsWindow::Week);
        let expected = (Utc::now() - chrono::Duration::weeks(1))
            .date_naive()
            .format("%Y-%m-%d")
            .to_string();
        let report = engine.run(&tokens()).await;
        assert!(report.is_clean());

        let (_, params) = h
            .transport
            .calls()
            .into_iter()
            .find(|(path, _)| path == "/v10.0/P1/insights")
            .unwrap();
        assert!(params.contains(&("since".to_string(), expected)));
        assert!(params.contains(&("period".to_string(), "day".to_string())));
    }

    #[tokio::test]
    async fn no_tokens_is_an_empty_clean_run() {
        let h = Harness::new();
        let report = h.engine(LoadToggles::default()).run(&[]).await;
        assert_eq!(report, RunReport::default());
        assert!(h.transport.calls().is_empty());
    }
}
