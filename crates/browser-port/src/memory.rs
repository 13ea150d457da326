//! Deterministic in-memory [`BrowserSession`].
//!
//! Pages are plain [`RawNode`] trees with scripted [`Behavior`]s attached to
//! nodes. Every mutating command is recorded so callers can assert exactly
//! what reached the browser. Activity probes decay pending requests and DOM
//! churn by one unit per call, which makes stability waits reproducible.

use async_trait::async_trait;
use parking_lot::Mutex;
use qapilot_core_types::{NodeId, SessionId, TabId};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::errors::SessionError;
use crate::model::{ActivitySample, ClickOutcome, PageSnapshot, RawNode, TabTarget};
use crate::session::BrowserSession;

pub const BLANK_URL: &str = "about:blank";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryPage {
    pub url: String,
    #[serde(default)]
    pub title: String,
    pub root: RawNode,
    #[serde(default)]
    pub behaviors: Vec<Behavior>,
    /// Requests still in flight right after the page loads.
    #[serde(default)]
    pub load_inflight: u32,
}

impl MemoryPage {
    pub fn new(url: impl Into<String>, title: impl Into<String>, root: RawNode) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            root,
            behaviors: Vec::new(),
            load_inflight: 0,
        }
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behaviors.push(behavior);
        self
    }

    pub fn with_load_inflight(mut self, requests: u32) -> Self {
        self.load_inflight = requests;
        self
    }

    fn blank() -> Self {
        Self::new(BLANK_URL, "", RawNode::new(0, "body"))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    #[default]
    Click,
    Input,
    Choose,
}

/// Scripted reaction of a page to a command on one node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Behavior {
    pub node_id: NodeId,
    #[serde(default)]
    pub on: Trigger,
    pub effect: Effect,
    /// Activity probes that keep reporting DOM churn after the effect lands.
    #[serde(default)]
    pub churn: u32,
}

impl Behavior {
    pub fn on_click(node_id: u64, effect: Effect) -> Self {
        Self {
            node_id: NodeId(node_id),
            on: Trigger::Click,
            effect,
            churn: 0,
        }
    }

    pub fn on(mut self, trigger: Trigger) -> Self {
        self.on = trigger;
        self
    }

    pub fn with_churn(mut self, probes: u32) -> Self {
        self.churn = probes;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Effect {
    Navigate { url: String },
    Reveal { parent: NodeId, nodes: Vec<RawNode> },
    Remove { node_id: NodeId },
    SetText { node_id: NodeId, text: String },
    OpenTab { url: String },
    Fail { message: String },
    Disconnect,
}

/// A mutating command as it reached the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionCommand {
    Navigate(String),
    Click(NodeId),
    Input { node: NodeId, text: String },
    ChooseOption { node: NodeId, option: String },
    Scroll(i32),
    SwitchTab(TabTarget),
    Release,
}

struct Tab {
    id: TabId,
    page: MemoryPage,
}

struct MemoryState {
    site: Vec<MemoryPage>,
    tabs: Vec<Tab>,
    active: usize,
    next_tab: u32,
    inflight: u32,
    churn: u32,
    mutation_seq: u64,
    scroll_y: i64,
    released: bool,
    disconnected: Option<String>,
    commands: Vec<SessionCommand>,
}

impl MemoryState {
    fn ensure_usable(&self) -> Result<(), SessionError> {
        if self.released {
            return Err(SessionError::Released);
        }
        if let Some(reason) = &self.disconnected {
            return Err(SessionError::disconnected(reason.clone()));
        }
        Ok(())
    }

    fn tab(&self) -> &Tab {
        &self.tabs[self.active]
    }

    fn tab_mut(&mut self) -> &mut Tab {
        &mut self.tabs[self.active]
    }

    fn open_tab(&mut self, page: MemoryPage) -> TabId {
        self.next_tab += 1;
        let id = TabId(format!("tab-{}", self.next_tab));
        self.inflight = page.load_inflight;
        self.tabs.push(Tab {
            id: id.clone(),
            page,
        });
        self.active = self.tabs.len() - 1;
        self.mutation_seq += 1;
        id
    }

    fn lookup(&self, url: &str) -> Option<MemoryPage> {
        let wanted = url.trim_end_matches('/');
        self.site
            .iter()
            .find(|page| page.url.trim_end_matches('/') == wanted)
            .cloned()
    }

    fn load(&mut self, url: &str) -> Result<(), SessionError> {
        let page = if url == BLANK_URL {
            MemoryPage::blank()
        } else {
            self.lookup(url).ok_or_else(|| SessionError::Navigation {
                url: url.to_string(),
                reason: "no such page".to_string(),
            })?
        };
        self.inflight = page.load_inflight;
        self.scroll_y = 0;
        self.tab_mut().page = page;
        self.mutation_seq += 1;
        Ok(())
    }

    fn node(&self, node: NodeId) -> Result<&RawNode, SessionError> {
        self.tab()
            .page
            .root
            .find(node)
            .ok_or(SessionError::NodeDetached { node })
    }

    fn interactable(&self, node: NodeId) -> Result<&RawNode, SessionError> {
        let raw = self.node(node)?;
        if raw.is_interactable() {
            Ok(raw)
        } else {
            Err(SessionError::NotInteractable {
                node,
                reason: "hidden, disabled or without layout".to_string(),
            })
        }
    }

    fn options_for(&self, node: NodeId) -> Result<Vec<String>, SessionError> {
        let raw = self.node(node)?;
        let mut options = collect_options(raw);
        if options.is_empty() {
            if let Some(controlled) = raw
                .attr("aria-controls")
                .and_then(|id| self.tab().page.root.find_by_dom_id(id))
            {
                options = collect_options(controlled);
            }
        }
        Ok(options)
    }

    /// Applies every behavior bound to `node` for `trigger`. Returns whether
    /// any behavior matched and the tab opened by it, if one was.
    fn react(
        &mut self,
        node: NodeId,
        trigger: Trigger,
    ) -> Result<(bool, Option<TabId>), SessionError> {
        let behaviors: Vec<Behavior> = self
            .tab()
            .page
            .behaviors
            .iter()
            .filter(|b| b.node_id == node && b.on == trigger)
            .cloned()
            .collect();
        let mut opened = None;
        for behavior in &behaviors {
            self.churn += behavior.churn;
            if let Some(tab) = self.apply(&behavior.effect)? {
                opened = Some(tab);
            }
        }
        Ok((!behaviors.is_empty(), opened))
    }

    fn apply(&mut self, effect: &Effect) -> Result<Option<TabId>, SessionError> {
        match effect {
            Effect::Navigate { url } => self.load(url)?,
            Effect::Reveal { parent, nodes } => {
                let root = &mut self.tab_mut().page.root;
                let target = root
                    .find_mut(*parent)
                    .ok_or(SessionError::NodeDetached { node: *parent })?;
                target.children.extend(nodes.iter().cloned());
                self.mutation_seq += 1;
            }
            Effect::Remove { node_id } => {
                self.tab_mut().page.root.remove(*node_id);
                self.mutation_seq += 1;
            }
            Effect::SetText { node_id, text } => {
                let root = &mut self.tab_mut().page.root;
                let target = root
                    .find_mut(*node_id)
                    .ok_or(SessionError::NodeDetached { node: *node_id })?;
                target.text = text.clone();
                self.mutation_seq += 1;
            }
            Effect::OpenTab { url } => {
                let page = self.lookup(url).ok_or_else(|| SessionError::Navigation {
                    url: url.clone(),
                    reason: "no such page".to_string(),
                })?;
                return Ok(Some(self.open_tab(page)));
            }
            Effect::Fail { message } => return Err(SessionError::rejected(message.clone())),
            Effect::Disconnect => {
                let reason = "target crashed".to_string();
                self.disconnected = Some(reason.clone());
                return Err(SessionError::disconnected(reason));
            }
        }
        Ok(None)
    }
}

fn collect_options(raw: &RawNode) -> Vec<String> {
    let mut options = Vec::new();
    raw.walk(&mut |node, depth| {
        if depth == 0 {
            return;
        }
        if node.tag == "option" || node.role.as_deref() == Some("option") {
            let label = node.text_content();
            if !label.is_empty() {
                options.push(label);
            }
        }
    });
    options
}

fn resolve_href(base: &str, href: &str) -> Option<String> {
    if let Ok(absolute) = Url::parse(href) {
        return Some(absolute.to_string());
    }
    Url::parse(base)
        .ok()?
        .join(href)
        .ok()
        .map(|url| url.to_string())
}

pub struct MemorySession {
    id: SessionId,
    state: Mutex<MemoryState>,
}

impl MemorySession {
    /// A session over `pages`, starting on a blank tab.
    pub fn new(pages: impl IntoIterator<Item = MemoryPage>) -> Self {
        Self {
            id: SessionId::new(),
            state: Mutex::new(MemoryState {
                site: pages.into_iter().collect(),
                tabs: vec![Tab {
                    id: TabId::new("tab-1"),
                    page: MemoryPage::blank(),
                }],
                active: 0,
                next_tab: 1,
                inflight: 0,
                churn: 0,
                mutation_seq: 0,
                scroll_y: 0,
                released: false,
                disconnected: None,
                commands: Vec::new(),
            }),
        }
    }

    /// A session already showing `url`, without recording a navigation.
    pub fn opened_at(
        pages: impl IntoIterator<Item = MemoryPage>,
        url: &str,
    ) -> Result<Self, SessionError> {
        let session = Self::new(pages);
        {
            let mut state = session.state.lock();
            state.load(url)?;
            state.inflight = 0;
        }
        Ok(session)
    }

    /// Mutating commands received so far, in order.
    pub fn commands(&self) -> Vec<SessionCommand> {
        self.state.lock().commands.clone()
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    pub fn scroll_position(&self) -> i64 {
        self.state.lock().scroll_y
    }

    /// Simulates a browser crash; every later call fails fatally.
    pub fn disconnect(&self, reason: impl Into<String>) {
        self.state.lock().disconnected = Some(reason.into());
    }

    /// Queues network requests and DOM churn for the next probes.
    pub fn inject_activity(&self, inflight: u32, churn: u32) {
        let mut state = self.state.lock();
        state.inflight += inflight;
        state.churn += churn;
    }

    /// Replaces the active tab's tree in place.
    pub fn mutate_dom(&self, edit: impl FnOnce(&mut RawNode)) {
        let mut state = self.state.lock();
        edit(&mut state.tab_mut().page.root);
        state.mutation_seq += 1;
    }
}

#[async_trait]
impl BrowserSession for MemorySession {
    fn session_id(&self) -> &SessionId {
        &self.id
    }

    async fn snapshot(&self) -> Result<PageSnapshot, SessionError> {
        let state = self.state.lock();
        state.ensure_usable()?;
        let tab = state.tab();
        Ok(PageSnapshot {
            url: tab.page.url.clone(),
            title: tab.page.title.clone(),
            tab: tab.id.clone(),
            root: tab.page.root.clone(),
        })
    }

    async fn activity(&self) -> Result<ActivitySample, SessionError> {
        let mut state = self.state.lock();
        state.ensure_usable()?;
        let sample = ActivitySample {
            inflight_requests: state.inflight,
            mutation_seq: state.mutation_seq,
        };
        state.inflight = state.inflight.saturating_sub(1);
        if state.churn > 0 {
            state.churn -= 1;
            state.mutation_seq += 1;
        }
        Ok(sample)
    }

    async fn current_url(&self) -> Result<String, SessionError> {
        let state = self.state.lock();
        state.ensure_usable()?;
        Ok(state.tab().page.url.clone())
    }

    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        state.ensure_usable()?;
        state.commands.push(SessionCommand::Navigate(url.to_string()));
        debug!(session = %self.id, url, "memory session navigate");
        state.load(url)
    }

    async fn click(&self, node: NodeId) -> Result<ClickOutcome, SessionError> {
        let mut state = self.state.lock();
        state.ensure_usable()?;
        state.commands.push(SessionCommand::Click(node));
        let raw = state.interactable(node)?;
        let href = (raw.tag == "a").then(|| raw.attr("href").map(str::to_string)).flatten();

        let (matched, opened_tab) = state.react(node, Trigger::Click)?;
        if !matched {
            if let Some(href) = href {
                let base = state.tab().page.url.clone();
                let target = resolve_href(&base, &href).ok_or_else(|| SessionError::Navigation {
                    url: href.clone(),
                    reason: "unresolvable link".to_string(),
                })?;
                state.load(&target)?;
            }
        }
        Ok(ClickOutcome { opened_tab })
    }

    async fn input(&self, node: NodeId, text: &str, clear: bool) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        state.ensure_usable()?;
        state.commands.push(SessionCommand::Input {
            node,
            text: text.to_string(),
        });
        if !state.interactable(node)?.accepts_text() {
            return Err(SessionError::NotInteractable {
                node,
                reason: "element does not accept text".to_string(),
            });
        }
        if let Some(target) = state.tab_mut().page.root.find_mut(node) {
            let value = if clear {
                text.to_string()
            } else {
                format!("{}{}", target.attr("value").unwrap_or_default(), text)
            };
            target.attributes.insert("value".to_string(), value);
        }
        state.mutation_seq += 1;
        state.react(node, Trigger::Input)?;
        Ok(())
    }

    async fn list_options(&self, node: NodeId) -> Result<Vec<String>, SessionError> {
        let state = self.state.lock();
        state.ensure_usable()?;
        state.interactable(node)?;
        let options = state.options_for(node)?;
        if options.is_empty() {
            return Err(SessionError::rejected(format!("{node} offers no options")));
        }
        Ok(options)
    }

    async fn choose_option(&self, node: NodeId, text: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        state.ensure_usable()?;
        state.commands.push(SessionCommand::ChooseOption {
            node,
            option: text.to_string(),
        });
        state.interactable(node)?;
        if !state.options_for(node)?.iter().any(|option| option == text) {
            return Err(SessionError::OptionNotFound {
                node,
                option: text.to_string(),
            });
        }
        if let Some(target) = state.tab_mut().page.root.find_mut(node) {
            target
                .attributes
                .insert("value".to_string(), text.to_string());
        }
        state.mutation_seq += 1;
        state.react(node, Trigger::Choose)?;
        Ok(())
    }

    async fn scroll(&self, amount: i32) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        state.ensure_usable()?;
        state.commands.push(SessionCommand::Scroll(amount));
        state.scroll_y = (state.scroll_y + i64::from(amount)).max(0);
        Ok(())
    }

    async fn extract(&self, query: &str) -> Result<String, SessionError> {
        let state = self.state.lock();
        state.ensure_usable()?;
        let mut lines = Vec::new();
        state.tab().page.root.walk(&mut |node, _| {
            let text = node.text.trim();
            if node.visible && !text.is_empty() {
                lines.push(text.to_string());
            }
        });
        let needle = query.trim().to_lowercase();
        if !needle.is_empty() {
            let matching: Vec<String> = lines
                .iter()
                .filter(|line| line.to_lowercase().contains(&needle))
                .cloned()
                .collect();
            if !matching.is_empty() {
                return Ok(matching.join("\n"));
            }
        }
        Ok(lines.join("\n"))
    }

    async fn switch_tab(&self, target: &TabTarget) -> Result<TabId, SessionError> {
        let mut state = self.state.lock();
        state.ensure_usable()?;
        state.commands.push(SessionCommand::SwitchTab(target.clone()));
        match target {
            TabTarget::New => Ok(state.open_tab(MemoryPage::blank())),
            TabTarget::Existing(id) => {
                let index = state
                    .tabs
                    .iter()
                    .position(|tab| &tab.id == id)
                    .ok_or_else(|| SessionError::UnknownTab(id.clone()))?;
                state.active = index;
                state.mutation_seq += 1;
                Ok(id.clone())
            }
        }
    }

    async fn is_interactable(&self, node: NodeId) -> Result<bool, SessionError> {
        let state = self.state.lock();
        state.ensure_usable()?;
        Ok(state.node(node)?.is_interactable())
    }

    async fn release(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        if state.released {
            return Ok(());
        }
        state.commands.push(SessionCommand::Release);
        state.released = true;
        debug!(session = %self.id, "memory session released");
        Ok(())
    }
}
