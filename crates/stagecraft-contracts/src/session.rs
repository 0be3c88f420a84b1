use uuid::Uuid;

/// The four screens of the creation workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Selection,
    Creation,
    Loading,
    Result,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    AddBackground,
    Inpainting,
}

/// Session state for one creation workflow.
///
/// All mutation goes through the named transitions below; callers hold the
/// session by reference and never reach into fields to change screens. A
/// failed generation returns to the editing screen with the error attached
/// and every prior input preserved, so the user can retry without
/// re-entering anything.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    pub screen: Screen,
    pub mode: Option<Mode>,
    pub uploaded_image: Option<Vec<u8>>,
    pub optimized_image: Option<Vec<u8>>,
    pub generated_images: Vec<Vec<u8>>,
    pub last_user_prompt: String,
    pub last_negative_prompt: String,
    pub inpainting_base_image: Option<Vec<u8>>,
    pub error: Option<String>,
    pub loading_message: String,
}

impl Session {
    pub fn new() -> Session {
        Session {
            id: Uuid::new_v4().to_string(),
            screen: Screen::Selection,
            mode: None,
            uploaded_image: None,
            optimized_image: None,
            generated_images: Vec::new(),
            last_user_prompt: String::new(),
            last_negative_prompt: String::new(),
            inpainting_base_image: None,
            error: None,
            loading_message: String::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Back to the selection screen, dropping all session inputs. The
    /// session id survives so event streams stay correlated.
    pub fn reset(&mut self) {
        let id = self.id.clone();
        *self = Session::new();
        self.id = id;
    }

    pub fn select_mode(&mut self, mode: Mode) {
        self.mode = Some(mode);
        self.screen = Screen::Creation;
    }

    /// A new base image invalidates previous results.
    pub fn set_upload(&mut self, original: Vec<u8>, optimized: Vec<u8>) {
        self.uploaded_image = Some(original);
        self.optimized_image = Some(optimized);
        self.generated_images.clear();
    }

    pub fn remove_upload(&mut self) {
        self.uploaded_image = None;
        self.optimized_image = None;
    }

    pub fn begin_generation(
        &mut self,
        prompt: impl Into<String>,
        negative_prompt: impl Into<String>,
        loading_message: impl Into<String>,
    ) {
        self.screen = Screen::Loading;
        self.last_user_prompt = prompt.into();
        self.last_negative_prompt = negative_prompt.into();
        self.error = None;
        self.loading_message = loading_message.into();
    }

    pub fn finish_generation(&mut self, images: Vec<Vec<u8>>) {
        self.generated_images = images;
        self.screen = Screen::Result;
    }

    /// Generation failed: return to editing with the message attached.
    /// Prompts and images are untouched.
    pub fn fail_generation(&mut self, message: impl Into<String>) {
        self.screen = Screen::Creation;
        self.error = Some(format!("圖片生成失敗：{}", message.into()));
    }

    /// Carry one chosen result into inpainting mode as the new base.
    pub fn start_inpainting(&mut self, base_image: Vec<u8>) {
        self.mode = Some(Mode::Inpainting);
        self.inpainting_base_image = Some(base_image);
        self.screen = Screen::Creation;
    }

    /// An inpaint result replaces the result set and becomes the base for
    /// further inpainting rounds.
    pub fn finish_inpaint(&mut self, image: Vec<u8>) {
        self.inpainting_base_image = Some(image.clone());
        self.generated_images = vec![image];
        self.screen = Screen::Result;
    }

    pub fn back_to_creation(&mut self) {
        self.screen = Screen::Creation;
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}
