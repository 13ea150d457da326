//! Executor behavior against the in-memory session.

use action_primitives::{
    ActionErrorKind, ActionExecutor, ActionKind, ActionRequest, SelectTarget,
};
use browser_port::memory::{MemoryPage, MemorySession, SessionCommand};
use browser_port::{NodeId, RawNode, TabId, TabTarget};
use perceiver_structural::{ElementIndex, IndexBuilder};
use qapilot_core_types::{Generation, Handle};
use tokio_test::assert_ok;

const URL: &str = "https://shop.test/profile";

fn profile_page() -> MemoryPage {
    let links = (0..11).map(|i| {
        RawNode::new(100 + i, "a")
            .with_text(format!("Nav {i}"))
            .with_attr("href", "#")
    });
    let gender = RawNode::new(200, "div")
        .with_role("combobox")
        .with_attr("aria-label", "Gender")
        .with_attr("aria-controls", "gender-options");
    let options = RawNode::new(201, "ul")
        .with_attr("id", "gender-options")
        .hidden()
        .with_children([
            RawNode::new(202, "li").with_role("option").with_text("Men"),
            RawNode::new(203, "li").with_role("option").with_text("Women"),
        ]);
    let submit = RawNode::new(300, "button").with_text("Save");
    let country_a = RawNode::new(400, "div")
        .with_role("combobox")
        .with_attr("aria-label", "Country of birth")
        .with_child(RawNode::new(401, "span").with_role("option").with_text("France"));
    let country_b = RawNode::new(410, "div")
        .with_role("combobox")
        .with_attr("aria-label", "Country of residence")
        .with_child(RawNode::new(411, "span").with_role("option").with_text("Spain"));

    let root = RawNode::new(1, "body")
        .with_children(links)
        .with_children([gender, options, submit, country_a, country_b]);
    MemoryPage::new(URL, "Profile", root)
}

async fn setup() -> (MemorySession, IndexBuilder, ElementIndex) {
    let session = assert_ok!(MemorySession::opened_at([profile_page()], URL));
    let builder = IndexBuilder::default();
    let index = assert_ok!(builder.build(&session).await);
    (session, builder, index)
}

fn request(index: &ElementIndex, kind: ActionKind) -> ActionRequest {
    ActionRequest::new(index.generation(), kind)
}

#[tokio::test]
async fn test_stale_requests_never_reach_the_session() {
    let (session, builder, old) = setup().await;
    let current = assert_ok!(builder.build(&session).await);
    let executor = ActionExecutor::default();

    let kinds = [
        ActionKind::Click { handle: Handle(13) },
        ActionKind::Navigate {
            url: "https://shop.test/".into(),
        },
        ActionKind::Scroll { amount: 300 },
        ActionKind::ChooseOption {
            target: SelectTarget::Handle(Handle(12)),
            text: "Men".into(),
        },
    ];
    for kind in kinds {
        let result = executor
            .execute(&session, &request(&old, kind), &current)
            .await;
        assert!(result.is_stale(), "{} should be stale", result.action);
        assert_eq!(result.error_kind, Some(ActionErrorKind::StaleHandle));
    }
    assert!(session.commands().is_empty());
}

#[tokio::test]
async fn test_click_resolves_handle_to_node() {
    let (session, _builder, index) = setup().await;
    let executor = ActionExecutor::default();
    let save = index.get(Handle(13)).expect("save button");
    assert_eq!(save.text, "Save");

    let result = executor
        .execute(&session, &request(&index, ActionKind::Click { handle: Handle(13) }), &index)
        .await;
    assert!(result.is_success());
    assert!(result.mutated);
    assert_eq!(session.commands(), vec![SessionCommand::Click(NodeId(300))]);
}

#[tokio::test]
async fn test_two_step_selection_requires_listed_text() {
    let (session, builder, index) = setup().await;
    let executor = ActionExecutor::default();
    let target = SelectTarget::Handle(Handle(12));

    let early = executor
        .execute(
            &session,
            &request(
                &index,
                ActionKind::ChooseOption {
                    target: target.clone(),
                    text: "Men".into(),
                },
            ),
            &index,
        )
        .await;
    assert_eq!(early.error_kind, Some(ActionErrorKind::Validation));

    let listed = executor
        .execute(
            &session,
            &request(&index, ActionKind::ListOptions { target: target.clone() }),
            &index,
        )
        .await;
    assert!(listed.is_success());
    assert!(!listed.mutated);
    assert_eq!(listed.extracted_content.as_deref(), Some(r#"["Men","Women"]"#));

    let chosen = executor
        .execute(
            &session,
            &request(
                &index,
                ActionKind::ChooseOption {
                    target: target.clone(),
                    text: "Men".into(),
                },
            ),
            &index,
        )
        .await;
    assert!(chosen.is_success());

    let rebuilt = assert_ok!(builder.build(&session).await);
    let other = executor
        .execute(
            &session,
            &request(
                &rebuilt,
                ActionKind::ChooseOption {
                    target,
                    text: "Other".into(),
                },
            ),
            &rebuilt,
        )
        .await;
    assert_eq!(other.error_kind, Some(ActionErrorKind::Validation));
    assert_eq!(
        session.commands(),
        vec![SessionCommand::ChooseOption {
            node: NodeId(200),
            option: "Men".into()
        }]
    );
}

#[tokio::test]
async fn test_ambiguous_labels_are_refused() {
    let (session, _builder, index) = setup().await;
    let executor = ActionExecutor::default();

    let result = executor
        .execute(
            &session,
            &request(
                &index,
                ActionKind::ListOptions {
                    target: SelectTarget::Label("country".into()),
                },
            ),
            &index,
        )
        .await;
    assert_eq!(result.error_kind, Some(ActionErrorKind::AmbiguousTarget));

    let unique = executor
        .execute(
            &session,
            &request(
                &index,
                ActionKind::ListOptions {
                    target: SelectTarget::Label("residence".into()),
                },
            ),
            &index,
        )
        .await;
    assert_eq!(unique.extracted_content.as_deref(), Some(r#"["Spain"]"#));
}

#[tokio::test]
async fn test_interactability_is_rechecked_at_call_time() {
    let (session, _builder, index) = setup().await;
    let executor = ActionExecutor::default();
    session.mutate_dom(|root| {
        if let Some(button) = root.find_mut(NodeId(300)) {
            button.attributes.insert("disabled".into(), String::new());
        }
    });

    let result = executor
        .execute(&session, &request(&index, ActionKind::Click { handle: Handle(13) }), &index)
        .await;
    assert_eq!(result.error_kind, Some(ActionErrorKind::NotInteractable));
    assert!(session.commands().is_empty());
}

#[tokio::test]
async fn test_malformed_requests_fail_validation() {
    let (session, _builder, index) = setup().await;
    let executor = ActionExecutor::default();

    let missing = executor
        .execute(&session, &request(&index, ActionKind::Click { handle: Handle(999) }), &index)
        .await;
    assert_eq!(missing.error_kind, Some(ActionErrorKind::Validation));

    let bad_url = executor
        .execute(
            &session,
            &request(&index, ActionKind::Navigate { url: "not a url".into() }),
            &index,
        )
        .await;
    assert_eq!(bad_url.error_kind, Some(ActionErrorKind::Validation));

    let unknown_tab = executor
        .execute(
            &session,
            &request(
                &index,
                ActionKind::SwitchTab {
                    tab: TabTarget::Existing(TabId::new("tab-9")),
                },
            ),
            &index,
        )
        .await;
    assert_eq!(unknown_tab.error_kind, Some(ActionErrorKind::Validation));
}

#[tokio::test]
async fn test_lost_session_is_fatal() {
    let (session, _builder, index) = setup().await;
    let executor = ActionExecutor::default();
    session.disconnect("renderer crashed");

    let result = executor
        .execute(&session, &request(&index, ActionKind::Scroll { amount: 200 }), &index)
        .await;
    assert_eq!(result.error_kind, Some(ActionErrorKind::SessionFatal));
}

#[tokio::test]
async fn test_terminate_and_extract_do_not_mutate() {
    let (session, _builder, index) = setup().await;
    let executor = ActionExecutor::default();

    let extracted = executor
        .execute(
            &session,
            &request(&index, ActionKind::Extract { query: "save".into() }),
            &index,
        )
        .await;
    assert_eq!(extracted.extracted_content.as_deref(), Some("Save"));

    let done = executor
        .execute(
            &session,
            &request(
                &index,
                ActionKind::Terminate {
                    success: true,
                    summary: "profile saved".into(),
                },
            ),
            &index,
        )
        .await;
    assert!(done.is_terminal);
    assert_eq!(done.terminal_success, Some(true));
    assert!(session.commands().is_empty());
}

#[tokio::test]
async fn test_generation_is_checked_before_anything_else() {
    let (session, _builder, index) = setup().await;
    let executor = ActionExecutor::default();
    let ahead = ActionRequest::new(
        Generation(index.generation().0 + 5),
        ActionKind::Click { handle: Handle(999) },
    );
    let result = executor.execute(&session, &ahead, &index).await;
    assert!(result.is_stale());
}
