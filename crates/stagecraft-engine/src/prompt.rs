//! Instruction payload assembly.
//!
//! Pure text: everything here renders structured request context into the
//! exact Traditional-Chinese instruction blocks the remote model receives.
//! No I/O, no state.

/// Number of viewpoint variants in one background-synthesis batch.
pub const VIEWPOINT_COUNT: usize = 4;

/// System instruction for the prompt-enhancement call: one small, tasteful
/// adjustment, nothing more.
pub const ENHANCE_SYSTEM_INSTRUCTION: &str = "你是一位詠唱專家，專門微調魔導指令(prompt)。你的任務是接收一個舊的指令，並在不改變其核心主體與意圖的前提下，**只做一個微小的、巧妙的調整**。可以是增加一個小細節、稍微改變光線描述、或替換一個形容詞，目標是讓下一次的生成結果與前一次有些許不同，同時保持快速處理。直接返回微調後的新指令(純文字)，不要包含任何額外說明。語言：繁體中文。";

/// Scene-analysis instruction: three fixed suggestion categories with
/// absolute size anchoring and subject-lore injection rules.
pub fn analysis_instruction(subject_details: &str) -> String {
    format!(
        r#"作為一名AI攝影與場景設計專家，請分析以下提供的「主體」圖片與其屬性。
「主體」屬性："""
{subject_details}
"""
您的任務是，以繁體中文，為此「主體」生成三種固定主軸的商業攝影背景建議：「使用情境」、「成果展示」、「靜物擺放」。每種建議都必須包含「指令」、「視覺焦點」與「光線提醒」。

**最高指導原則(1)：場景佈局策略 (Scene Layout Strategy) - 絕對尺寸錨定**
在構思任何場景時，您必須**優先處理尺寸和比例問題**，這是本次生成的首要目標。

- **尺寸與比例強制執行（零容忍規則）**：您必須從上方提供的「主體」屬性中，識別出具體的尺寸描述 (例如: 長度 25 公分)。這是最重要的指令。然後，您**必須**在場景中引入一個**視覺上可識別且尺寸與「主體」具有明確比例關係的參照物**。 **關鍵規則：此參照物必須與「主體」的傳說或功能有直接關聯性。** 例如，如果主體是「用於切結婚紀念日的蛋糕」的蛋糕刀，那麼合適的參照物是「一個香檳杯」或「一塊蛋糕」，**絕對不能**是無關的「智慧型手機」或「書本」。您必須將這種關聯性與相對大小關係在指令中被精確描述出來。
- **常識與物理定律審查**：任何描述都必須符合基本物理邏輯，不得出現尺寸較小的物體承載尺寸遠大於自身的物體等違背常識的情況。使用相對比較詞（例如：兩倍大、三分之一寬）來取代純粹的數字羅列。

**最高指導原則(2)：「主體」傳說/關聯性強制注入**
將「主體」屬性中提供的傳說或任何功能/歷史背景，作為該場景中不可或缺的敘事核心。這條規則的優先級高於一切美學考量。

**關鍵規則：**
1. **指令(prompt)**：必須包含**「主體」尺寸的相對描述**、背景細節、光線和整體氛圍，不需指定拍攝視角。
2. **視覺焦點(focus)**：說明該場景希望引導觀眾注意的重點。
3. **光線提醒(lighting)**：提供具體的光線設定建議，以增強真實感。
4. **場景設計**：場景地點應具備邏輯性，不應強加無關的地理位置。
5. **人物**：若場景中需包含人物，一律預設為台灣人。
6. **物件限制**：除了「主體」和必要的、與傳說/功能直接相關的參照物外，嚴格禁止在「指令」中添加任何不相關的物件。"#
    )
}

/// The optional strict-avoidance clause appended to generation payloads.
pub fn negative_section(negative_prompt: &str) -> String {
    let trimmed = negative_prompt.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n【嚴格迴避】\n- {trimmed}")
    }
}

/// Wrap the user's creative instruction in the four viewpoint directives.
/// Each variant is explicitly told to differ from the other three; the
/// fourth leaves the dramatic angle to the model.
pub fn viewpoint_variants(user_prompt: &str) -> [String; VIEWPOINT_COUNT] {
    [
        format!("生成第一個場景，確保此場景與其他三個不同，且使用**平視角**：{user_prompt}"),
        format!("生成第二個場景，確保此場景與其他三個不同，且使用**高視角**：{user_prompt}"),
        format!("生成第三個場景，確保此場景與其他三個不同，且使用**鳥瞰視角**：{user_prompt}"),
        format!("生成第四個場景，確保此場景與其他三個都不同，並由你判斷使用一個**最能突顯主體立體感與場景 atmospheres 的戲劇性視角**：{user_prompt}"),
    ]
}

/// Full background-synthesis instruction for one viewpoint: the staged
/// image's transparent pixels are the region to paint, with scale
/// anchoring, layout locking, quality, particle-effect, edge-sampling and
/// self-check directives around the user's request.
pub fn background_instruction(viewpoint_prompt: &str, negative_prompt: &str) -> String {
    let negative = negative_section(negative_prompt);
    format!(
        r#"您將收到一張主圖，其中主體的透明像素（alpha=0）代表可填補的背景，其非透明像素的邊界，等同於四條邊界貼片證據（上/下/左/右），您必須以此為基準進行擴繪，並符合使用者「{viewpoint_prompt}」的指令。

【尺寸與比例（最高優先級）】
這是一條零容忍的物理定律級規則。使用者指令中任何關於尺寸的描述（例如：長度25公分，直徑8cm）都**不是**建議，而是**必須嚴格、精確遵守的物理現實**。

1. **識別所有錨點**：您必須首先掃描整個使用者指令，識別出**所有**被賦予具體尺寸的物體。例如，在「一個10公分高的探照燈旁邊有一個40公分長的工具箱」中，您有兩個錨點：探照燈(10cm)和工具箱(40cm)。

2. **建立比例尺並強制執行**：您必須在內部建立一個視覺比例尺。根據上一個例子，工具箱的長度**必須**在視覺上呈現為探照灯高度的**四倍**。這種相對大小關係是**不可協商的**。如果因為透視關係導致比例失真，您必須調整構圖（例如，將較大的物體放在更前面）來維持視覺上的邏輯正確性。

3. **執行相對擴繪**：當您擴繪場景中的其他物件時，它們的尺寸都**必須**與您建立的比例尺保持一致，確保整個場景的物理現實感。

4. **最終強制審查**：在輸出最終圖像前，進行一次強制性的比例審查。問自己：「如果物體A是X公分，物體B是Y公分，我的畫面是否忠實地反映了它們的相對大小？」
    * **重大失敗範例**：如果一個「10公分的探照燈」在擴繪後，看起來比放在它旁邊的「40公分的工具箱」還要大或長，那麼這次生成就是**徹底失敗**。您必須拋棄結果並從頭重新生成，直到比例完全正確為止。

【空間佈局與透視控制（關鍵執行指令）】
當使用者指令中包含兩個或多個尺寸完全相同的物體時，您的首要任務是確保它們在最終的 2D 圖像中「看起來」也完全一樣大。為了達成此目標，您必須嚴格遵守以下佈局原則：
1.  **共面放置 (Co-planar Placement)**：您必須將這些尺寸相同的物體想像成放置在同一條無形的線上，並確保它們與虛擬相機的距離完全相等。
2.  **抑制透視 (Perspective Suppression)**：絕對禁止為了營造「深度感」或「藝術效果」而將其中一個物體放置在另一個物體的前方。任何會導致透視收縮（perspective foreshortening）而改變其視覺大小的佈局都是不被允許的。
3.  **優先級**：此「佈局鎖定」規則的優先級高於一般的構圖美學。即使犧牲一些畫面的自然感，也必須優先保證尺寸比較的準確性。這是一項技術性指令，而非藝術性建議。

【品質要求（模擬高步數）】
請將此次生成視為一次需要投入更多運算資源的高品質渲染。目標是達到攝影級的真實感、豐富的紋理細節、以及複雜且自然的光影效果。不接受任何模糊、塗抹感或細節不足的區域。

【特效細節（範圍與強度控制）】
如果使用者指令中要求了火花、煙霧、粉塵、木屑等粒子特效，您必須**嚴格控制其範圍與強度**。這些效果的範圍應該非常小，視覺強度應為點綴級別，絕不能干擾或遮擋主要物體。目標是產生**少量、精緻**的粒子效果，而非大規模、誇張的特效場景。

【關鍵執行策略：邊緣採樣】
您必須分析非透明區域邊緣的像素，採樣其顏色、紋理與光照方向，並將這些特徵自然地延伸到新的擴繪区域中。若生成結果與原圖產生「貼圖感」或「拼接感」，將被視為重大失敗。

【禁止與失敗定義（零容忍）】
- 禁止：將遮罩區生成為與邊界貼片語義無關的新場景（例如室內邊界卻生成戶外天空）。
- 禁止：忽略邊界貼片的色彩/光向/紋理而憑文字自行創作。
- 失敗條件（任一即判定失敗）：(a) 邊界 1–2px 內外平均亮度差或梯度差異異常增大；(b) 遮罩區的主色群與邊界貼片的主色群顯著偏離；(c) 遮罩區出現大面積單色或單純漸層。

【自我檢查】
請你在本次生成內做一次「自我質檢」，特別是檢查「尺寸與比例」、「品質要求」與「特效細節」是否符合要求。若不合格請內部重試最多 2 次。

【輸出格式】
您的輸出只能是圖片檔案 (Image file ONLY)。禁止輸出任何文字或確認訊息。{negative}"#
    )
}

/// Masked-inpainting instruction: the mask's white region is the placement
/// and scale authority, the subject image is the visual identity, and the
/// per-region lines carry the user's directives.
pub fn inpaint_instruction(
    region_instructions: &str,
    subject_name: &str,
    negative_prompt: &str,
) -> String {
    let negative = negative_section(negative_prompt);
    let subject_identity = if subject_name.trim().is_empty() {
        "指定的物件"
    } else {
        subject_name.trim()
    };
    format!(
        r#"這是一項高優先級的「主體注入」內繪任務。
【任務目標】
您的核心目標是將一個特定的「主體」物件，精確地繪製到使用者指定的區域內。

【輸入資料】
1.  **原始圖像 (背景)**: 這是背景。
2.  **遮罩圖像 (位置與大小)**: **白色區域**代表了「主體」應該被放置的**精確位置和縮放比例**。這個區域就是一個邊界框。
3.  **主體圖像 (要繪製的物件)**: 這是您必須繪製到場景中的具體物件。
4.  **使用者指令**: """{region_instructions}"""
5.  **「主體」身份**: 使用者指令中提到的「主體」，指的是一個「{subject_identity}」，其視覺外觀由**主體圖像**決定。

【執行步驟 - 嚴格遵守】
1.  **識別主體**: 根據**主體圖像**，理解你要繪製的核心物件是什麼。
2.  **匹配遮罩**: **此為最高優先級規則。** 您必須將這個**主體圖像**的內容完整地繪製在**遮罩圖像**的白色區域內。白色區域的形狀、大小和位置定義了主體最終在畫面上的視覺大小和位置。如果使用者畫了一個大圈，主體就應該畫得大；如果畫了小圈，主體就應該畫得小。
3.  **無縫融合**: 在將「主體」繪製完成後，您的第二任務是確保其邊緣與周圍的背景（原始圖像的黑色遮罩區域）完美融合。這包括匹配光線方向、生成逼真的陰影、以及協調紋理和色彩。目標是讓新加入的「主體」看起來完全不突兀，彷彿本來就在那裡。
4.  **移除 vs. 新增**: 如果指令是移除物件，您必須**忽略主體圖像**，並將遮罩區域用符合周圍環境的背景填補。如果指令是新增或替換成「主體」，則嚴格執行上述步驟1-3。

【輸出格式】
您的輸出只能是圖片檔案 (Image file ONLY)。禁止輸出任何文字或確認訊息。{negative}"#
    )
}

/// Removal instructions must not be steered by a stale subject reference;
/// when one is detected the subject image is left out of the payload.
pub fn is_removal_instruction(text: &str) -> bool {
    text.contains("移除") || text.contains("remove")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewpoint_variants_are_distinct_and_carry_the_prompt() {
        let variants = viewpoint_variants("放在木桌上");
        assert_eq!(variants.len(), VIEWPOINT_COUNT);
        for variant in &variants {
            assert!(variant.contains("放在木桌上"));
        }
        assert!(variants[0].contains("平視角"));
        assert!(variants[1].contains("高視角"));
        assert!(variants[2].contains("鳥瞰視角"));
        assert!(variants[3].contains("戲劇性視角"));
        for i in 0..variants.len() {
            for j in (i + 1)..variants.len() {
                assert_ne!(variants[i], variants[j]);
            }
        }
    }

    #[test]
    fn negative_section_only_appears_when_non_blank() {
        assert_eq!(negative_section(""), "");
        assert_eq!(negative_section("   "), "");
        assert_eq!(negative_section("文字"), "\n【嚴格迴避】\n- 文字");
    }

    #[test]
    fn background_instruction_embeds_prompt_and_negative() {
        let instruction = background_instruction("一張原木書桌", "多餘的手指");
        assert!(instruction.contains("「一張原木書桌」"));
        assert!(instruction.contains("【嚴格迴避】\n- 多餘的手指"));
        assert!(instruction.contains("Image file ONLY"));
    }

    #[test]
    fn inpaint_instruction_defaults_the_subject_identity() {
        let with_name = inpaint_instruction("- 紅色: add steam", "蛋糕刀", "");
        assert!(with_name.contains("「蛋糕刀」"));
        assert!(with_name.contains("- 紅色: add steam"));

        let without_name = inpaint_instruction("- 紅色: add steam", "  ", "");
        assert!(without_name.contains("「指定的物件」"));
    }

    #[test]
    fn removal_keywords_are_detected() {
        assert!(is_removal_instruction("- 紅色: 移除這個杯子"));
        assert!(is_removal_instruction("- red: remove the cup"));
        assert!(!is_removal_instruction("- 紅色: 加上蒸氣"));
    }

    #[test]
    fn analysis_instruction_quotes_the_subject_details() {
        let instruction = analysis_instruction("一把銀色的蛋糕刀 長度約 25 公分");
        assert!(instruction.contains("一把銀色的蛋糕刀 長度約 25 公分"));
        assert!(instruction.contains("使用情境"));
        assert!(instruction.contains("成果展示"));
        assert!(instruction.contains("靜物擺放"));
    }
}
