//! Blocking OS file dialogs run on their own thread; results are picked up
//! by the UI thread once per frame.

use std::{
    path::PathBuf,
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::warn;

const IMAGE_EXTENSIONS: &[&str] = &["exr", "hdr", "png", "jpg", "jpeg", "bmp", "tga"];
const SAVE_EXTENSIONS: &[(&str, &[&str])] = &[
    ("OpenEXR image", &["exr"]),
    ("HDR image", &["hdr"]),
    ("Portable Network Graphics image", &["png"]),
    ("JPEG image", &["jpg", "jpeg"]),
    ("Bitmap image", &["bmp"]),
    ("Truevision TGA image", &["tga"]),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DialogResult {
    Open(Vec<PathBuf>),
    Save(PathBuf),
    Cancelled,
}

pub struct FileDialogThread {
    handle: Option<JoinHandle<()>>,
    tx: Sender<DialogResult>,
    rx: Receiver<DialogResult>,
}

impl Default for FileDialogThread {
    fn default() -> Self {
        Self::new()
    }
}

impl FileDialogThread {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { handle: None, tx, rx }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Run `dialog` on a fresh thread. Refused while a dialog is still open.
    pub fn spawn(&mut self, dialog: impl FnOnce() -> DialogResult + Send + 'static) -> bool {
        if self.is_running() {
            warn!("[dialog] file dialog already running");
            return false;
        }
        if let Some(finished) = self.handle.take() {
            let _ = finished.join();
        }

        let tx = self.tx.clone();
        let spawned = thread::Builder::new()
            .name("file-dialog".to_string())
            .spawn(move || {
                let _ = tx.send(dialog());
            });
        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                true
            }
            Err(e) => {
                warn!("[dialog] failed to start dialog thread: {e}");
                false
            }
        }
    }

    pub fn open_images(&mut self) -> bool {
        self.spawn(|| {
            let paths = rfd::FileDialog::new()
                .add_filter("All images", IMAGE_EXTENSIONS)
                .pick_files()
                .unwrap_or_default();
            if paths.is_empty() {
                DialogResult::Cancelled
            } else {
                DialogResult::Open(paths)
            }
        })
    }

    pub fn save_image(&mut self) -> bool {
        self.spawn(|| {
            let dialog = SAVE_EXTENSIONS
                .iter()
                .fold(rfd::FileDialog::new(), |d, (name, exts)| d.add_filter(*name, *exts));
            dialog.save_file().map_or(DialogResult::Cancelled, DialogResult::Save)
        })
    }

    pub fn try_recv(&self) -> Option<DialogResult> {
        self.rx.try_recv().ok()
    }
}
