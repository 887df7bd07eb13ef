// SPDX-License-Identifier: CEPL-1.0
use lodge_core::{Key, PlatformEvent};
use tracing::trace;
use winit::event::{ElementState, WindowEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

pub fn map_key_code(code: KeyCode) -> Key {
    match code {
        KeyCode::KeyW => Key::W,
        KeyCode::KeyA => Key::A,
        KeyCode::KeyS => Key::S,
        KeyCode::KeyD => Key::D,
        KeyCode::ArrowUp => Key::Up,
        KeyCode::ArrowDown => Key::Down,
        KeyCode::Escape => Key::Escape,
        _ => Key::Other,
    }
}

/// Auto-repeat arrives as another `Pressed`; callers forward it unchanged.
pub fn translate_key(physical: PhysicalKey, state: ElementState) -> PlatformEvent {
    let key = match physical {
        PhysicalKey::Code(code) => map_key_code(code),
        PhysicalKey::Unidentified(_) => Key::Other,
    };
    PlatformEvent::KeyChanged {
        key,
        pressed: state == ElementState::Pressed,
    }
}

/// Window events the frame loop consumes. Close and redraw requests are the
/// shell's business and map to `None`.
pub fn translate(event: &WindowEvent) -> Option<PlatformEvent> {
    match event {
        WindowEvent::Resized(size) => Some(PlatformEvent::Resized {
            width: size.width,
            height: size.height,
        }),
        WindowEvent::KeyboardInput { event, .. } => {
            if event.repeat {
                trace!("key repeat {:?}", event.physical_key);
            }
            Some(translate_key(event.physical_key, event.state))
        }
        _ => None,
    }
}
