use std::sync::Arc;

use iocraft::prelude::*;
use tokio::sync::watch;

use upchunk::UploadSession;

const BAR_WIDTH: usize = 30;

#[derive(Default, Props)]
pub struct ProgressBarProps {
    pub percent: f32,
}

#[component]
pub fn ProgressBar(props: &ProgressBarProps) -> impl Into<AnyElement<'static>> {
    let percent = props.percent.clamp(0.0, 100.0);
    let filled = ((percent / 100.0) * BAR_WIDTH as f32).round() as usize;

    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(content: "[")
            Text(content: "#".repeat(filled), color: Color::Cyan)
            Text(content: "-".repeat(BAR_WIDTH - filled))
            Text(content: "]")
        }
    }
}

#[derive(Default, Props)]
pub struct UploadViewProps {
    pub file_name: String,
    pub progress: Option<watch::Receiver<f32>>,
    pub session: Option<Arc<UploadSession>>,
}

/// One file's row: progress bar, status text, and the pause/cancel keys.
#[component]
pub fn UploadView(props: &UploadViewProps, mut hooks: Hooks) -> impl Into<AnyElement<'static>> {
    let mut percent = hooks.use_state(|| 0.0f32);
    let mut paused = hooks.use_state(|| false);

    let rx = props.progress.clone();
    hooks.use_future(async move {
        let Some(mut rx) = rx else { return };
        loop {
            percent.set(*rx.borrow_and_update());
            if rx.changed().await.is_err() {
                break;
            }
        }
    });

    let session = props.session.clone();
    hooks.use_terminal_events(move |event| {
        let Some(session) = &session else { return };
        match event {
            TerminalEvent::Key(KeyEvent { code, kind, .. }) if kind != KeyEventKind::Release => {
                match code {
                    KeyCode::Char('p') => {
                        paused.set(session.toggle_pause());
                    }
                    KeyCode::Char('c') => session.cancel(),
                    _ => {}
                }
            }
            _ => {}
        }
    });

    let status = if paused.get() {
        "Paused".to_string()
    } else {
        format!("Uploading: {}%", percent.get().round() as u32)
    };

    element! {
        View(flex_direction: FlexDirection::Column) {
            View(flex_direction: FlexDirection::Row) {
                Text(content: format!("{} ", props.file_name), weight: Weight::Bold)
                ProgressBar(percent: percent.get())
                Text(content: format!(" {status}"))
            }
            Text(content: "p: pause/play, c: cancel", color: Color::DarkGrey)
        }
    }
}

#[derive(Default, Props)]
pub struct MessageProps {
    pub message: String,
}

#[component]
pub fn ErrorMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(content: "✗ ", color: Color::Red)
            Text(content: props.message.clone())
        }
    }
}

#[component]
pub fn SuccessMessage(props: &MessageProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Row) {
            Text(content: "✓ ", color: Color::Green)
            Text(content: props.message.clone())
        }
    }
}

#[component]
pub fn ConfigHeader() -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Column) {
            View(background_color: Color::Blue) {
                Text(content: " upchunk configuration ", color: Color::White)
            }
            Text(content: "")
        }
    }
}

#[derive(Default, Props)]
pub struct InputPromptProps {
    pub prompt: String,
    pub default: Option<String>,
    pub description: Option<String>,
}

#[component]
pub fn InputPrompt(props: &InputPromptProps) -> impl Into<AnyElement<'static>> {
    element! {
        View(flex_direction: FlexDirection::Column) {
            #(props.description.as_ref().map(|description| element! {
                Text(content: description.clone(), color: Color::DarkGrey)
            }))
            View(flex_direction: FlexDirection::Row) {
                Text(content: props.prompt.clone(), weight: Weight::Bold)
                #(props.default.as_ref().map(|default| element! {
                    Text(content: format!(" [{default}]"), color: Color::DarkGrey)
                }))
            }
        }
    }
}
