//! Operator panel: button layout, input mapping and quad-view composition.
//!
//! The panel is 1280x720. A row of buttons runs along the top; below it the
//! four streams are tiled RGB | Depth colour over Left | Right. Text is not
//! rendered, buttons carry state through their fill colour only.

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::cache::CacheSnapshot;
use crate::frame::StreamId;
use crate::save::{SaveGroup, SaveToggles};
use crate::session::{Action, SessionState};

pub const PANEL_WIDTH: u32 = 1280;
pub const PANEL_HEIGHT: u32 = 720;
pub const TILE_WIDTH: u32 = 620;
pub const TILE_HEIGHT: u32 = 280;

pub const ESCAPE: char = '\u{1b}';

const BACKGROUND: Rgb<u8> = Rgb([24, 24, 24]);
const EMPTY_TILE: Rgb<u8> = Rgb([48, 48, 48]);
const DISABLED: Rgb<u8> = Rgb([80, 80, 80]);
const SAVING: Rgb<u8> = Rgb([230, 190, 40]);
const BORDER: Rgb<u8> = Rgb([200, 200, 200]);

/// Inclusive pixel rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl Rect {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.x1 <= x && x <= self.x2 && self.y1 <= y && y <= self.y2
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Button {
    pub action: Action,
    pub label: &'static str,
    pub rect: Rect,
    color: Rgb<u8>,
}

pub const BUTTONS: [Button; 6] = [
    Button {
        action: Action::Start,
        label: "Start",
        rect: Rect::new(20, 20, 120, 60),
        color: Rgb([40, 150, 60]),
    },
    Button {
        action: Action::Stop,
        label: "Stop",
        rect: Rect::new(140, 20, 240, 60),
        color: Rgb([170, 50, 40]),
    },
    Button {
        action: Action::ToggleSave(SaveGroup::Color),
        label: "Save RGB",
        rect: Rect::new(260, 20, 380, 60),
        color: Rgb([50, 90, 170]),
    },
    Button {
        action: Action::ToggleSave(SaveGroup::Depth),
        label: "Save Depth",
        rect: Rect::new(400, 20, 520, 60),
        color: Rgb([50, 90, 170]),
    },
    Button {
        action: Action::ToggleSave(SaveGroup::LeftRight),
        label: "Save L+R",
        rect: Rect::new(540, 20, 660, 60),
        color: Rgb([50, 90, 170]),
    },
    Button {
        action: Action::Quit,
        label: "Quit",
        rect: Rect::new(680, 20, 780, 60),
        color: Rgb([110, 110, 110]),
    },
];

/// Top-left corner of each stream's tile.
pub fn tile_origin(stream: StreamId) -> (u32, u32) {
    match stream {
        StreamId::Color => (10, 130),
        StreamId::Depth => (650, 130),
        StreamId::Left => (10, 440),
        StreamId::Right => (650, 440),
    }
}

/// Button under a click, if any.
pub fn hit_test(x: i32, y: i32) -> Option<Action> {
    BUTTONS
        .iter()
        .find(|button| button.rect.contains(x, y))
        .map(|button| button.action)
}

/// Keyboard shortcut for an action.
pub fn action_for_key(key: char) -> Option<Action> {
    match key {
        's' => Some(Action::Start),
        'p' => Some(Action::Stop),
        'r' => Some(Action::ToggleSave(SaveGroup::Color)),
        'd' => Some(Action::ToggleSave(SaveGroup::Depth)),
        'l' => Some(Action::ToggleSave(SaveGroup::LeftRight)),
        'q' | ESCAPE => Some(Action::Quit),
        _ => None,
    }
}

fn button_fill(button: &Button, state: SessionState, toggles: SaveToggles) -> Rgb<u8> {
    let running = state == SessionState::Running;
    match button.action {
        Action::Start if state != SessionState::Idle => DISABLED,
        Action::Stop if state == SessionState::Idle => DISABLED,
        Action::ToggleSave(_) if !running => DISABLED,
        Action::ToggleSave(group) if toggles.is_enabled(group) => SAVING,
        _ => button.color,
    }
}

fn fill_rect(panel: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    let (w, h) = panel.dimensions();
    for y in rect.y1.max(0)..=rect.y2.min(h as i32 - 1) {
        for x in rect.x1.max(0)..=rect.x2.min(w as i32 - 1) {
            panel.put_pixel(x as u32, y as u32, color);
        }
    }
}

fn outline_rect(panel: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    fill_rect(panel, Rect::new(rect.x1, rect.y1, rect.x2, rect.y1), color);
    fill_rect(panel, Rect::new(rect.x1, rect.y2, rect.x2, rect.y2), color);
    fill_rect(panel, Rect::new(rect.x1, rect.y1, rect.x1, rect.y2), color);
    fill_rect(panel, Rect::new(rect.x2, rect.y1, rect.x2, rect.y2), color);
}

fn tile_image(snapshot: &CacheSnapshot, stream: StreamId) -> Option<&RgbImage> {
    match stream {
        StreamId::Depth => snapshot.depth_view().map(|view| view.image()),
        _ => snapshot.frame(stream).and_then(|frame| frame.as_rgb()),
    }
}

/// Render the whole panel from a cache snapshot and the session state.
pub fn compose_panel(
    snapshot: &CacheSnapshot,
    state: SessionState,
    toggles: SaveToggles,
) -> RgbImage {
    let mut panel = RgbImage::from_pixel(PANEL_WIDTH, PANEL_HEIGHT, BACKGROUND);

    for button in BUTTONS.iter() {
        fill_rect(&mut panel, button.rect, button_fill(button, state, toggles));
        outline_rect(&mut panel, button.rect, BORDER);
    }

    for stream in StreamId::ALL {
        let (x, y) = tile_origin(stream);
        match tile_image(snapshot, stream) {
            Some(image) => {
                let scaled = if image.dimensions() == (TILE_WIDTH, TILE_HEIGHT) {
                    image.clone()
                } else {
                    imageops::resize(image, TILE_WIDTH, TILE_HEIGHT, FilterType::Triangle)
                };
                imageops::overlay(&mut panel, &scaled, x as i64, y as i64);
            }
            None => {
                let rect = Rect::new(
                    x as i32,
                    y as i32,
                    (x + TILE_WIDTH) as i32 - 1,
                    (y + TILE_HEIGHT) as i32 - 1,
                );
                fill_rect(&mut panel, rect, EMPTY_TILE);
            }
        }
    }
    panel
}
