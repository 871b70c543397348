//! Canned customer-facing replies in English and Arabic. Every rule-driven
//! step answers from here; only policy answers come from the generator.

use trustline_core::config::NormalizerConfig;
use trustline_core::dialogue::{DialogueState, Language};
use trustline_core::domain::complaint::{ComplaintCategory, ComplaintId};
use trustline_core::domain::order::{Order, OrderId, OrderStatus};

use crate::attachments::ExtractionError;

pub struct ReplyBook {
    order_id_example: String,
}

impl Default for ReplyBook {
    fn default() -> Self {
        Self { order_id_example: "ORD-001".to_owned() }
    }
}

fn pick(language: Language, en: &str, ar: &str) -> String {
    match language {
        Language::En => en.to_owned(),
        Language::Ar => ar.to_owned(),
    }
}

fn id_list(ids: &[OrderId]) -> String {
    ids.iter().map(|id| id.0.as_str()).collect::<Vec<_>>().join(", ")
}

pub fn category_label(category: ComplaintCategory, language: Language) -> &'static str {
    match (category, language) {
        (ComplaintCategory::DamagedItem, Language::En) => "Damaged item",
        (ComplaintCategory::MissingItem, Language::En) => "Missing item",
        (ComplaintCategory::WrongItem, Language::En) => "Wrong item",
        (ComplaintCategory::LateDelivery, Language::En) => "Late delivery",
        (ComplaintCategory::ServiceConduct, Language::En) => "Courier or staff conduct",
        (ComplaintCategory::Escalation, Language::En) => "Speak to a manager",
        (ComplaintCategory::Other, Language::En) => "Something else",
        (ComplaintCategory::DamagedItem, Language::Ar) => "منتج تالف",
        (ComplaintCategory::MissingItem, Language::Ar) => "منتج ناقص",
        (ComplaintCategory::WrongItem, Language::Ar) => "منتج خاطئ",
        (ComplaintCategory::LateDelivery, Language::Ar) => "تأخير في التوصيل",
        (ComplaintCategory::ServiceConduct, Language::Ar) => "سوء تعامل المندوب أو الموظف",
        (ComplaintCategory::Escalation, Language::Ar) => "التحدث مع مسؤول",
        (ComplaintCategory::Other, Language::Ar) => "أمر آخر",
    }
}

pub fn status_label(status: OrderStatus, language: Language) -> &'static str {
    match (status, language) {
        (OrderStatus::Received, Language::En) => "received",
        (OrderStatus::Preparing, Language::En) => "being prepared",
        (OrderStatus::OutForDelivery, Language::En) => "out for delivery",
        (OrderStatus::Delivered, Language::En) => "delivered",
        (OrderStatus::Cancelled, Language::En) => "cancelled",
        (OrderStatus::Received, Language::Ar) => "تم استلامه",
        (OrderStatus::Preparing, Language::Ar) => "قيد التجهيز",
        (OrderStatus::OutForDelivery, Language::Ar) => "خرج للتوصيل",
        (OrderStatus::Delivered, Language::Ar) => "تم توصيله",
        (OrderStatus::Cancelled, Language::Ar) => "ملغي",
    }
}

impl ReplyBook {
    pub fn new(config: &NormalizerConfig) -> Self {
        let digits = config.order_id_digits.max(1);
        Self {
            order_id_example: format!(
                "{}{}1",
                config.order_id_prefix.trim().to_ascii_uppercase(),
                "0".repeat(digits - 1)
            ),
        }
    }

    pub fn greet(&self, language: Language) -> String {
        pick(
            language,
            "Hello! I can help you track an order, file a complaint, or answer questions about our policies. How can I help?",
            "أهلاً بك! يمكنني مساعدتك في تتبع طلبك أو تقديم شكوى أو الإجابة عن أسئلتك حول سياساتنا. كيف يمكنني مساعدتك؟",
        )
    }

    pub fn prompt_order_id(&self, language: Language) -> String {
        match language {
            Language::En => format!(
                "Please send your order ID (for example {}). If you don't have it, just say so and I'll look it up by phone number.",
                self.order_id_example
            ),
            Language::Ar => format!(
                "يرجى إرسال رقم الطلب (مثال: {}). إذا لم يكن لديك الرقم، أخبرني وسأبحث عنه برقم الهاتف.",
                self.order_id_example
            ),
        }
    }

    pub fn prompt_phone(&self, language: Language) -> String {
        pick(
            language,
            "Thanks. Please send the phone number used for this order so I can verify it.",
            "شكراً. يرجى إرسال رقم الهاتف المستخدم في هذا الطلب للتحقق منه.",
        )
    }

    pub fn prompt_phone_lookup(&self, language: Language) -> String {
        pick(
            language,
            "No problem. Please send the phone number you used when ordering and I'll find your order.",
            "لا مشكلة. يرجى إرسال رقم الهاتف الذي استخدمته عند الطلب وسأجد طلبك.",
        )
    }

    pub fn invalid_order_id(&self, language: Language, candidates: &[OrderId]) -> String {
        if !candidates.is_empty() {
            return self.candidates(language, candidates);
        }
        match language {
            Language::En => format!(
                "That doesn't look like a valid order ID. Order IDs look like {}. Please try again.",
                self.order_id_example
            ),
            Language::Ar => format!(
                "رقم الطلب غير صحيح. أرقام الطلبات تكون بالشكل {}. يرجى المحاولة مرة أخرى.",
                self.order_id_example
            ),
        }
    }

    pub fn invalid_phone(&self, language: Language) -> String {
        pick(
            language,
            "That doesn't look like a valid phone number. Please send it with or without the country code, for example 0791234567.",
            "رقم الهاتف غير صحيح. يرجى إرساله مع رمز الدولة أو بدونه، مثال: 0791234567.",
        )
    }

    pub fn verified(&self, language: Language, order: &Order) -> String {
        match language {
            Language::En => format!(
                "Thank you, you're verified. Your order {} is currently {}. How can I help you with it?",
                order.id,
                status_label(order.status, language)
            ),
            Language::Ar => format!(
                "شكراً، تم التحقق بنجاح. طلبك رقم {} حالته: {}. كيف يمكنني مساعدتك بخصوصه؟",
                order.id,
                status_label(order.status, language)
            ),
        }
    }

    pub fn candidates(&self, language: Language, ids: &[OrderId]) -> String {
        match language {
            Language::En => format!(
                "I found several orders for that phone number: {}. Please send the order ID you need help with.",
                id_list(ids)
            ),
            Language::Ar => format!(
                "وجدت عدة طلبات مرتبطة برقم الهاتف هذا: {}. يرجى إرسال رقم الطلب الذي تحتاج المساعدة فيه.",
                id_list(ids)
            ),
        }
    }

    pub fn phone_mismatch(&self, language: Language, attempts_left: u32) -> String {
        match language {
            Language::En => format!(
                "Sorry, I couldn't verify an order with those details, so I can't share any order information. Please send your order ID again. Attempts left: {attempts_left}."
            ),
            Language::Ar => format!(
                "عذراً، لم أتمكن من التحقق من الطلب بهذه البيانات، لذلك لا يمكنني مشاركة أي معلومات. يرجى إرسال رقم الطلب مرة أخرى. المحاولات المتبقية: {attempts_left}."
            ),
        }
    }

    pub fn order_status(&self, language: Language, order: &Order) -> String {
        match language {
            Language::En => format!(
                "Your order {} is currently {}. Is there anything else I can help with?",
                order.id,
                status_label(order.status, language)
            ),
            Language::Ar => format!(
                "طلبك رقم {} حالته: {}. هل هناك شيء آخر يمكنني مساعدتك به؟",
                order.id,
                status_label(order.status, language)
            ),
        }
    }

    pub fn category_menu(&self, language: Language) -> String {
        let options: Vec<String> = ComplaintCategory::ALL
            .iter()
            .enumerate()
            .map(|(index, category)| format!("{}. {}", index + 1, category_label(*category, language)))
            .collect();
        let header = pick(
            language,
            "I'm sorry to hear that. What is the complaint about? Reply with a number:",
            "يؤسفني سماع ذلك. ما موضوع الشكوى؟ أرسل الرقم المناسب:",
        );
        format!("{header}\n{}", options.join("\n"))
    }

    pub fn category_ineligible(
        &self,
        language: Language,
        category: ComplaintCategory,
        status: OrderStatus,
    ) -> String {
        match language {
            Language::En => format!(
                "Complaints about \"{}\" can only be filed after delivery, and your order is currently {}. You can choose another category or cancel.",
                category_label(category, language),
                status_label(status, language)
            ),
            Language::Ar => format!(
                "لا يمكن تقديم شكوى بخصوص \"{}\" إلا بعد التوصيل، وحالة طلبك حالياً: {}. يمكنك اختيار تصنيف آخر أو الإلغاء.",
                category_label(category, language),
                status_label(status, language)
            ),
        }
    }

    pub fn prompt_details(&self, language: Language, category: Option<ComplaintCategory>) -> String {
        let label = category.map(|category| category_label(category, language));
        match (language, label) {
            (Language::En, Some(label)) => format!(
                "Got it: {label}. Please describe what happened in a few sentences. You can also attach a file."
            ),
            (Language::Ar, Some(label)) => {
                format!("تم: {label}. يرجى وصف ما حدث ببضع جمل. يمكنك أيضاً إرفاق ملف.")
            }
            (Language::En, None) => {
                "Please describe what happened in a few sentences.".to_owned()
            }
            (Language::Ar, None) => "يرجى وصف ما حدث ببضع جمل.".to_owned(),
        }
    }

    pub fn complaint_filed(&self, language: Language, id: &ComplaintId) -> String {
        match language {
            Language::En => format!(
                "Your complaint has been recorded with reference {id}. Our support team will review it and contact you."
            ),
            Language::Ar => format!(
                "تم تسجيل شكواك برقم مرجعي {id}. سيقوم فريق الدعم بمراجعتها والتواصل معك."
            ),
        }
    }

    pub fn complaint_cancelled(&self, language: Language) -> String {
        pick(
            language,
            "Okay, I've discarded that complaint. Is there anything else I can help with?",
            "حسناً، تم إلغاء الشكوى. هل هناك شيء آخر يمكنني مساعدتك به؟",
        )
    }

    pub fn verification_cancelled(&self, language: Language) -> String {
        pick(
            language,
            "No problem, I've stopped the verification. How else can I help?",
            "لا مشكلة، تم إيقاف عملية التحقق. كيف يمكنني مساعدتك؟",
        )
    }

    pub fn out_of_scope(&self, language: Language) -> String {
        pick(
            language,
            "Sorry, I can only help with orders, complaints, and questions about our store policies.",
            "عذراً، يمكنني المساعدة فقط في الطلبات والشكاوى والأسئلة المتعلقة بسياسات المتجر.",
        )
    }

    pub fn deescalate(&self, language: Language) -> String {
        pick(
            language,
            "I understand this is frustrating, and I want to help sort it out.",
            "أتفهم انزعاجك تماماً، وأريد مساعدتك في حل المشكلة.",
        )
    }

    pub fn blocked(&self, language: Language) -> String {
        pick(
            language,
            "For security reasons this conversation has been closed. Please contact our support team directly.",
            "لأسباب أمنية تم إغلاق هذه المحادثة. يرجى التواصل مع فريق الدعم مباشرة.",
        )
    }

    pub fn retry_later(&self, language: Language) -> String {
        pick(
            language,
            "Sorry, something went wrong on our side. Please try again in a moment.",
            "عذراً، حدث خطأ من جهتنا. يرجى المحاولة مرة أخرى بعد قليل.",
        )
    }

    pub fn attachment_received(&self, language: Language) -> String {
        pick(
            language,
            "Thanks, I've added the attachment to your complaint.",
            "شكراً، تمت إضافة المرفق إلى شكواك.",
        )
    }

    pub fn attachment_rejected(&self, language: Language, error: &ExtractionError) -> String {
        let reason = match (error, language) {
            (ExtractionError::Unsupported(_), Language::En) => "That file type isn't supported.",
            (ExtractionError::TooLarge { .. }, Language::En) => "That file is too large.",
            (_, Language::En) => "I couldn't read that file.",
            (ExtractionError::Unsupported(_), Language::Ar) => "نوع الملف غير مدعوم.",
            (ExtractionError::TooLarge { .. }, Language::Ar) => "حجم الملف كبير جداً.",
            (_, Language::Ar) => "لم أتمكن من قراءة الملف.",
        };
        let ask = pick(language, "Please upload it again.", "يرجى رفعه مرة أخرى.");
        format!("{reason} {ask}")
    }

    pub fn attachment_not_expected(&self, language: Language) -> String {
        pick(
            language,
            "Attachments can be added while you are filing a complaint.",
            "يمكن إضافة المرفقات أثناء تقديم الشكوى فقط.",
        )
    }

    /// What to say when the conversation stays where it is.
    pub fn state_prompt(
        &self,
        language: Language,
        state: DialogueState,
        candidates: &[OrderId],
        last_complaint: Option<&ComplaintId>,
    ) -> String {
        match state {
            DialogueState::Start => self.greet(language),
            DialogueState::AwaitingOrderId if !candidates.is_empty() => {
                self.candidates(language, candidates)
            }
            DialogueState::AwaitingOrderId => self.prompt_order_id(language),
            DialogueState::AwaitingPhone => self.prompt_phone(language),
            DialogueState::VerifiedOrderContext => pick(
                language,
                "How can I help you with your order? You can ask about its status or file a complaint.",
                "كيف يمكنني مساعدتك بخصوص طلبك؟ يمكنك السؤال عن حالته أو تقديم شكوى.",
            ),
            DialogueState::ComplaintCategorySelection => self.category_menu(language),
            DialogueState::ComplaintDetailCollection => self.prompt_details(language, None),
            DialogueState::ComplaintFinalized => match last_complaint {
                Some(id) => match language {
                    Language::En => format!(
                        "Your complaint {id} has been recorded. Is there anything else I can help with?"
                    ),
                    Language::Ar => {
                        format!("تم تسجيل شكواك رقم {id}. هل هناك شيء آخر يمكنني مساعدتك به؟")
                    }
                },
                None => self.greet(language),
            },
            DialogueState::PolicyQa => pick(
                language,
                "What else would you like to know about our policies?",
                "ماذا تود أن تعرف أيضاً عن سياساتنا؟",
            ),
            DialogueState::OutOfScope => self.out_of_scope(language),
            DialogueState::SafetyBlocked => self.blocked(language),
        }
    }
}
