/// debug label 与默认 clear 使用的颜色
pub struct LabelColor;
impl LabelColor {
    const GREEN: glam::Vec4 = glam::vec4(0.0, 1.0, 0.0, 1.0);
    const BLUE: glam::Vec4 = glam::vec4(0.0, 0.0, 1.0, 1.0);
    const YELLOW: glam::Vec4 = glam::vec4(1.0, 1.0, 0.0, 1.0);

    pub const COLOR_PASS: glam::Vec4 = Self::BLUE;
    pub const COLOR_FRAME: glam::Vec4 = Self::YELLOW;
    pub const COLOR_CMD: glam::Vec4 = Self::GREEN;

    /// `render()` 默认 pass 的 clear color
    pub const CLEAR: glam::Vec4 = glam::vec4(0.1, 0.1, 0.12, 1.0);
}
