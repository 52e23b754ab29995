use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use tracecast_types::{Block, BlockContent, Destination, SessionEvent, SessionId};

use crate::markdown::render_blocks;

/// What the debouncer should do for one chat message.
///
/// Actions are keyed by `(session, destination, turn)` rather than a raw
/// message handle: the handle for a turn only exists once its `Send` has
/// completed, and the debouncer owns that binding. Per-turn FIFO through
/// the debouncer preserves the send-before-edit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchAction {
    pub session: SessionId,
    pub destination: Destination,
    pub turn: u64,
    pub kind: ActionKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Create the turn's message
    Send,
    /// Replace the turn's message text
    Edit,
}

/// Per-(session, destination) turn state machine.
///
/// Decides "new message vs. edit the open one" from the event stream and
/// suppresses no-op edits by hashing the last dispatched text. State is
/// serializable so an open turn survives a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnTracker {
    session: SessionId,
    destination: Destination,
    next_turn_seq: u64,
    open: Option<OpenTurn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenTurn {
    seq: u64,
    request_id: Option<String>,
    blocks: Vec<Block>,
    last_hash: Option<[u8; 32]>,
}

impl TurnTracker {
    pub fn new(session: SessionId, destination: Destination) -> Self {
        Self {
            session,
            destination,
            next_turn_seq: 0,
            open: None,
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// True while a turn is open and the idle-finalize timer should run.
    pub fn has_open_turn(&self) -> bool {
        self.open.is_some()
    }

    /// Feed one session event; returns the actions to dispatch.
    pub fn on_event(&mut self, event: &SessionEvent) -> Vec<DispatchAction> {
        match event {
            SessionEvent::ClearAll => {
                // Freeze without a final edit.
                self.open = None;
                Vec::new()
            }
            SessionEvent::AddBlock { block } => self.on_add(block),
            SessionEvent::UpdateBlock { block_id, content } => {
                let Some(open) = self.open.as_mut() else {
                    return Vec::new();
                };
                let Some(position) = open.blocks.iter().position(|b| b.id == *block_id) else {
                    // Either a frozen turn's block or an unknown id.
                    return Vec::new();
                };
                open.blocks[position].content = content.clone();
                self.emit_edit()
            }
        }
    }

    /// Idle-finalize: freeze the open turn without touching the message.
    pub fn on_idle(&mut self) {
        self.open = None;
    }

    fn on_add(&mut self, block: &Block) -> Vec<DispatchAction> {
        match &block.content {
            BlockContent::User { .. } => {
                // User input always begins a new exchange.
                self.start_turn(None, block)
            }
            BlockContent::Duration { .. } => {
                if self.open.is_none() {
                    // Nothing to close.
                    return Vec::new();
                }
                let actions = self.append_block(block);
                self.open = None;
                actions
            }
            content => match content.request_id() {
                Some(request_id) => {
                    let request_id = request_id.to_string();
                    let joins = self.open.as_ref().is_some_and(|open| {
                        open.request_id.is_none()
                            || open.request_id.as_deref() == Some(request_id.as_str())
                    });

                    if joins {
                        // The first assistant-side block adopts its request
                        // id into a user-opened turn.
                        if let Some(open) = self.open.as_mut()
                            && open.request_id.is_none()
                        {
                            open.request_id = Some(request_id);
                        }
                        self.append_block(block)
                    } else {
                        self.start_turn(Some(request_id), block)
                    }
                }
                None => {
                    // Orphan system blocks (and request-id-less assistant
                    // content) join the open turn, else stand alone.
                    if self.open.is_some() {
                        self.append_block(block)
                    } else {
                        self.start_turn(None, block)
                    }
                }
            },
        }
    }

    fn start_turn(&mut self, request_id: Option<String>, block: &Block) -> Vec<DispatchAction> {
        self.open = None;

        let seq = self.next_turn_seq;
        self.next_turn_seq += 1;

        let blocks = vec![block.clone()];
        let text = render_blocks(&blocks);
        let hash = hash_text(&text);

        self.open = Some(OpenTurn {
            seq,
            request_id,
            blocks,
            last_hash: Some(hash),
        });

        vec![DispatchAction {
            session: self.session.clone(),
            destination: self.destination.clone(),
            turn: seq,
            kind: ActionKind::Send,
            text,
        }]
    }

    fn append_block(&mut self, block: &Block) -> Vec<DispatchAction> {
        if let Some(open) = self.open.as_mut() {
            open.blocks.push(block.clone());
        }
        self.emit_edit()
    }

    fn emit_edit(&mut self) -> Vec<DispatchAction> {
        let Some(open) = self.open.as_mut() else {
            return Vec::new();
        };

        let text = render_blocks(&open.blocks);
        let hash = hash_text(&text);
        if open.last_hash == Some(hash) {
            // Rendered output did not change; suppress the no-op edit.
            return Vec::new();
        }
        open.last_hash = Some(hash);

        vec![DispatchAction {
            session: self.session.clone(),
            destination: self.destination.clone(),
            turn: open.seq,
            kind: ActionKind::Edit,
            text,
        }]
    }
}

fn hash_text(text: &str) -> [u8; 32] {
    Sha256::digest(text.as_bytes()).into()
}
